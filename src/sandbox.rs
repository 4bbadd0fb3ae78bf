//! Evaluate submission code and record the jobs it asks for
//!
//! Nothing submission code does reaches the outside world directly. `submit()` and the side
//! channel calls are recorders: they append to an [`Enumeration`] that the materializer turns into
//! jobs afterwards.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::lang::{self, Interrupt, Value};
use crate::materialize::schedule::ScheduleRequest;
use crate::script::Segments;

/// Recording host bound to the capability names
pub mod recorder;

use recorder::Recorder;

/// How many variants an evaluation should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Preview: stop as soon as the first variant is recorded
    Local,
    /// Submission: record every variant
    Batch,
}

/// One recorded `submit()` call, not yet frozen
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variant {
    /// Scope values in the order they were given
    pub draft: Vec<(String, Value)>,
    pub transfer_files: Vec<String>,
    pub packages: Vec<String>,
    pub overrides: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    /// Script line of the `submit()` call, `None` for the implicit variant
    pub line: Option<usize>,
}

/// Everything a submission block declared
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enumeration {
    pub variants: Vec<Variant>,
    pub schedule: ScheduleRequest,
}

pub struct Sandbox {
    mode: Mode,
}

impl Sandbox {
    pub fn new(mode: Mode) -> Sandbox {
        Sandbox { mode }
    }

    /// Evaluate the submission segment, if any, and return the recorded variants
    ///
    /// A script without a block, or a block that never calls `submit()`, yields exactly one
    /// variant with an empty scope.
    pub fn run(&self, segments: &Segments) -> Result<Enumeration> {
        let Some(segment) = &segments.submission else {
            debug!("No submission block, using one empty variant");
            return Ok(Enumeration {
                variants: vec![Variant::default()],
                schedule: ScheduleRequest::default(),
            });
        };

        info!(
            "Evaluating submission code from line {} in {:?} mode",
            segment.first_line, self.mode
        );
        let mut recorder = Recorder::new(self.mode, segment.first_line);
        match lang::run(&segment.code, &mut recorder) {
            Ok(()) => {}
            Err(Interrupt::Stop) => debug!("Submission code stopped after the first variant"),
            Err(Interrupt::Error(err)) => {
                return Err(Error::SubmissionCode {
                    line: segment.original_line(err.line),
                    message: err.message,
                })
            }
        }

        let enumeration = recorder.finish();
        info!(
            "Submission code recorded {} job variant(s)",
            enumeration.variants.len()
        );
        Ok(enumeration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Delimiters;
    use crate::script::extract;

    fn enumerate(script: &str, mode: Mode) -> Result<Enumeration> {
        let segments = extract(script, &Delimiters::default())?;
        Sandbox::new(mode).run(&segments)
    }

    fn scope_of(variant: &Variant) -> Vec<(&str, &Value)> {
        variant.draft.iter().map(|(k, v)| (k.as_str(), v)).collect()
    }

    const TWO_JOBS: &str = "#!/bin/bash\n# submit:begin\nsubmit(x=1)\nsubmit(x=2)\n# submit:end\necho $1\n";

    #[test]
    fn batch_mode_records_every_call() {
        let enumeration = enumerate(TWO_JOBS, Mode::Batch).unwrap();
        assert_eq!(enumeration.variants.len(), 2);
        assert_eq!(scope_of(&enumeration.variants[0]), vec![("x", &Value::Int(1))]);
        assert_eq!(scope_of(&enumeration.variants[1]), vec![("x", &Value::Int(2))]);
        assert_eq!(enumeration.variants[1].line, Some(4));
    }

    #[test]
    fn local_mode_stops_after_first() {
        let enumeration = enumerate(TWO_JOBS, Mode::Local).unwrap();
        assert_eq!(enumeration.variants.len(), 1);
        assert_eq!(scope_of(&enumeration.variants[0]), vec![("x", &Value::Int(1))]);
    }

    #[test]
    fn no_block_means_one_empty_variant() {
        let enumeration = enumerate("echo hello\n", Mode::Batch).unwrap();
        assert_eq!(enumeration.variants, vec![Variant::default()]);
    }

    #[test]
    fn block_without_submit_uses_defaults() {
        let script = "# submit:begin\npip('numpy')\nhtcondor('request_memory', '2GB')\n# submit:end\n";
        let enumeration = enumerate(script, Mode::Batch).unwrap();
        assert_eq!(enumeration.variants.len(), 1);
        let variant = &enumeration.variants[0];
        assert!(variant.draft.is_empty());
        assert_eq!(variant.packages, vec!["numpy"]);
        assert_eq!(variant.overrides["request_memory"], "2GB");
    }

    #[test]
    fn side_channels_attach_to_latest_variant() {
        let script = "# submit:begin\n\
            file('common.tar')\n\
            for n in range(2) {\n\
              submit({'n': n}, label='job' + str(n))\n\
              if n == 1 { htcondor(request_cpus=4); file('extra.txt') }\n\
            }\n\
            delay(60)\n\
            allowed_lateness(30)\n\
            # submit:end\n";
        let enumeration = enumerate(script, Mode::Batch).unwrap();
        let [first, second] = enumeration.variants.as_slice() else {
            panic!("expected two variants");
        };
        assert_eq!(
            scope_of(first),
            vec![("n", &Value::Int(0)), ("label", &Value::Str("job0".into()))]
        );
        assert_eq!(first.transfer_files, vec!["common.tar"]);
        assert!(first.overrides.is_empty());
        assert_eq!(second.transfer_files, vec!["common.tar", "extra.txt"]);
        assert_eq!(second.overrides["request_cpus"], "4");
        assert_eq!(enumeration.schedule.delay, Some(60.0));
        assert_eq!(enumeration.schedule.allowed_lateness, Some(30.0));
    }

    #[test]
    fn errors_point_at_script_lines() {
        let script = "#!/bin/bash\n# submit:begin\nsubmit(x=1)\nsubmit(x=undefined_name)\n# submit:end\n";
        match enumerate(script, Mode::Batch) {
            Err(Error::SubmissionCode { line, message }) => {
                assert_eq!(line, 4);
                assert!(message.contains("undefined_name"));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn duplicate_keyword_is_rejected() {
        let script = "# submit:begin\nsubmit({'x': 1}, x=2)\n# submit:end\n";
        assert!(matches!(
            enumerate(script, Mode::Batch),
            Err(Error::SubmissionCode { line: 2, .. })
        ));
    }

    #[test]
    fn map_keys_keep_written_order() {
        let script = "# submit:begin\nsubmit({'b': 1, 'a': 2}, z={'y': 1, 'x': 2})\n# submit:end\n";
        let enumeration = enumerate(script, Mode::Batch).unwrap();
        let variant = &enumeration.variants[0];
        let keys: Vec<&str> = variant.draft.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["b", "a", "z"]);

        let scope = crate::scope::Scope::freeze(variant.draft.iter().map(|(k, v)| (k.as_str(), v))).unwrap();
        assert_eq!(
            serde_json::to_string(&scope).unwrap(),
            r#"{"b":1,"a":2,"z":{"y":1,"x":2}}"#
        );
    }

    #[test]
    fn oversized_delay_is_a_submission_error() {
        let script = "# submit:begin\nsubmit(x=1)\ndelay(10000000000000)\n# submit:end\n";
        assert!(matches!(
            enumerate(script, Mode::Batch),
            Err(Error::SubmissionCode { line: 3, .. })
        ));
        let script = "# submit:begin\nallowed_lateness(1e300)\nsubmit(x=1)\n# submit:end\n";
        assert!(matches!(
            enumerate(script, Mode::Batch),
            Err(Error::SubmissionCode { line: 2, .. })
        ));
    }
}
