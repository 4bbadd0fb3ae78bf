use log::debug;

use crate::lang::{Args, EvalError, Host, Interrupt, Value};
use crate::materialize::schedule::{ScheduleRequest, MAX_SECONDS};
use crate::sandbox::{Enumeration, Mode, Variant};

/// Capability names bound while submission code runs
pub const CAPABILITIES: &[&str] = &[
    "submit",
    "pip",
    "htcondor",
    "file",
    "env",
    "delay",
    "allowed_lateness",
];

/// Collects variants and their side channel requirements
///
/// Side channel calls made before the first `submit()` build the defaults every variant starts
/// from. Once a variant exists they apply to the most recent one only.
pub struct Recorder {
    mode: Mode,
    first_line: usize,
    defaults: Variant,
    variants: Vec<Variant>,
    schedule: ScheduleRequest,
}

impl Recorder {
    pub fn new(mode: Mode, first_line: usize) -> Recorder {
        Recorder {
            mode,
            first_line,
            defaults: Variant::default(),
            variants: vec![],
            schedule: ScheduleRequest::default(),
        }
    }

    pub fn finish(self) -> Enumeration {
        let variants = if self.variants.is_empty() {
            debug!("submit() was never called, using the batch defaults as the only variant");
            vec![self.defaults]
        } else {
            self.variants
        };
        Enumeration {
            variants,
            schedule: self.schedule,
        }
    }

    fn current(&mut self) -> &mut Variant {
        match self.variants.last_mut() {
            Some(variant) => variant,
            None => &mut self.defaults,
        }
    }

    fn submit(&mut self, args: Args, line: usize) -> Result<Value, Interrupt> {
        if args.positional.len() > 1 {
            return Err(EvalError::new(line, "submit() takes at most one positional mapping").into());
        }
        let mut draft: Vec<(String, Value)> = vec![];
        if let Some(positional) = args.positional.into_iter().next() {
            match positional {
                Value::Map(map) => draft.extend(map),
                other => {
                    return Err(EvalError::new(
                        line,
                        format!("submit() expects a map, got {}", other.type_name()),
                    )
                    .into())
                }
            }
        }
        for (key, value) in args.keyword {
            if draft.iter().any(|(seen, _)| *seen == key) {
                return Err(EvalError::new(line, format!("submit() got key '{key}' twice")).into());
            }
            draft.push((key, value));
        }

        let variant = Variant {
            draft,
            line: Some(self.first_line + line - 1),
            ..self.defaults.clone()
        };
        debug!("Recorded variant {} from line {:?}", self.variants.len(), variant.line);
        self.variants.push(variant);

        match self.mode {
            Mode::Local => Err(Interrupt::Stop),
            Mode::Batch => Ok(Value::Null),
        }
    }
}

/// Flatten string and list-of-string arguments
fn strings(name: &str, args: Args, line: usize) -> Result<Vec<String>, EvalError> {
    if !args.keyword.is_empty() {
        return Err(EvalError::new(line, format!("{name}() does not take keyword arguments")));
    }
    let mut out = vec![];
    for value in args.positional {
        match value {
            Value::Str(s) => out.push(s),
            Value::List(items) => {
                for item in items {
                    match item {
                        Value::Str(s) => out.push(s),
                        other => {
                            return Err(EvalError::new(
                                line,
                                format!("{name}() expects strings, got {}", other.type_name()),
                            ))
                        }
                    }
                }
            }
            other => {
                return Err(EvalError::new(
                    line,
                    format!("{name}() expects strings, got {}", other.type_name()),
                ))
            }
        }
    }
    Ok(out)
}

/// Scalar rendered the way it should appear in a job description or environment
fn attribute_text(name: &str, value: &Value, line: usize) -> Result<String, EvalError> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(value.to_text()),
        other => Err(EvalError::new(
            line,
            format!("{name}() values must be scalars, got {}", other.type_name()),
        )),
    }
}

/// `name(key, value)` or `name(key=value, ...)`
fn pairs(name: &str, args: Args, line: usize) -> Result<Vec<(String, String)>, EvalError> {
    let mut out = vec![];
    match args.positional.as_slice() {
        [] => {}
        [Value::Str(key), value] => out.push((key.clone(), attribute_text(name, value, line)?)),
        _ => {
            return Err(EvalError::new(
                line,
                format!("{name}() takes a key and a value, or keyword arguments"),
            ))
        }
    }
    for (key, value) in &args.keyword {
        out.push((key.clone(), attribute_text(name, value, line)?));
    }
    if out.is_empty() {
        return Err(EvalError::new(line, format!("{name}() needs at least one setting")));
    }
    Ok(out)
}

fn is_variable_name(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn seconds(name: &str, args: &Args, line: usize) -> Result<f64, EvalError> {
    let value = match (args.positional.as_slice(), args.keyword.is_empty()) {
        ([value], true) => value,
        _ => return Err(EvalError::new(line, format!("{name}() takes one number of seconds"))),
    };
    let seconds = match value {
        Value::Int(i) => *i as f64,
        Value::Float(x) => *x,
        other => {
            return Err(EvalError::new(
                line,
                format!("{name}() expects a number, got {}", other.type_name()),
            ))
        }
    };
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(EvalError::new(
            line,
            format!("{name}() needs a non-negative number of seconds, got {seconds}"),
        ));
    }
    if seconds > MAX_SECONDS {
        return Err(EvalError::new(
            line,
            format!("{name}() accepts at most {MAX_SECONDS} seconds, got {seconds}"),
        ));
    }
    Ok(seconds)
}

impl Host for Recorder {
    fn capabilities(&self) -> &[&'static str] {
        CAPABILITIES
    }

    fn call(&mut self, name: &str, args: Args, line: usize) -> Result<Value, Interrupt> {
        match name {
            "submit" => return self.submit(args, line),
            "pip" => {
                let packages = strings(name, args, line)?;
                self.current().packages.extend(packages);
            }
            "file" => {
                let files = strings(name, args, line)?;
                self.current().transfer_files.extend(files);
            }
            "htcondor" => {
                let settings = pairs(name, args, line)?;
                self.current().overrides.extend(settings);
            }
            "env" => {
                let settings = pairs(name, args, line)?;
                if let Some((key, _)) = settings.iter().find(|(key, _)| !is_variable_name(key)) {
                    return Err(EvalError::new(
                        line,
                        format!("'{key}' is not a valid environment variable name"),
                    )
                    .into());
                }
                self.current().env.extend(settings);
            }
            "delay" => self.schedule.delay = Some(seconds(name, &args, line)?),
            "allowed_lateness" => self.schedule.allowed_lateness = Some(seconds(name, &args, line)?),
            _ => return Err(EvalError::new(line, format!("unknown capability '{name}'")).into()),
        }
        Ok(Value::Null)
    }
}
