use std::fmt::Write as _;
use std::sync::{Arc, Weak};

use chrono::format::{Item, StrftimeItems};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use indexmap::IndexMap;

use super::module as build_module;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::values::{Arity, CallArgs, Class, Instance, Module, Value};

const FIELDS: [&str; 7] = ["year", "month", "day", "hour", "minute", "second", "microsecond"];

fn receiver(args: &CallArgs) -> RuntimeResult<&Arc<Instance>> {
    match args.arg(0) {
        Some(Value::Instance(instance)) => Ok(instance),
        _ => Err(RuntimeError::TypeError(
            "descriptor requires a 'datetime' object".into(),
        )),
    }
}

fn naive_of(instance: &Instance) -> RuntimeResult<NaiveDateTime> {
    let field = |name: &str| {
        instance
            .get_attr(name)
            .and_then(|v| v.as_int())
            .unwrap_or(0)
    };
    NaiveDate::from_ymd_opt(field("year") as i32, field("month") as u32, field("day") as u32)
        .and_then(|date| {
            date.and_hms_micro_opt(
                field("hour") as u32,
                field("minute") as u32,
                field("second") as u32,
                field("microsecond") as u32,
            )
        })
        .ok_or_else(|| RuntimeError::ValueError("invalid datetime fields".into()))
}

fn store(instance: &Instance, dt: &NaiveDateTime) {
    let values = [
        dt.year() as i64,
        dt.month() as i64,
        dt.day() as i64,
        dt.hour() as i64,
        dt.minute() as i64,
        dt.second() as i64,
        (dt.nanosecond() / 1_000) as i64,
    ];
    for (name, value) in FIELDS.iter().zip(values) {
        instance.set_attr(*name, Value::Int(value));
    }
}

fn instance_of(class: &Weak<Class>, dt: NaiveDateTime) -> RuntimeResult<Value> {
    let class = class
        .upgrade()
        .ok_or_else(|| RuntimeError::Generic("datetime class is gone".into()))?;
    let instance = Instance::new(class);
    store(&instance, &dt);
    Ok(Value::Instance(Arc::new(instance)))
}

fn iso(dt: &NaiveDateTime, separator: char) -> String {
    let mut out = dt.format(&format!("%Y-%m-%d{}%H:%M:%S", separator)).to_string();
    let micros = dt.nanosecond() / 1_000;
    if micros != 0 {
        let _ = write!(out, ".{:06}", micros);
    }
    out
}

fn strftime(dt: &NaiveDateTime, format: &str) -> RuntimeResult<String> {
    let items: Vec<Item> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(RuntimeError::ValueError(format!("Invalid format string '{}'", format)));
    }
    let mut out = String::new();
    write!(out, "{}", dt.format_with_items(items.into_iter()))
        .map_err(|_| RuntimeError::ValueError(format!("Invalid format string '{}'", format)))?;
    Ok(out)
}

/// `datetime.datetime` over naive local time.
fn datetime_class() -> Arc<Class> {
    let class = Arc::new(Class::new("datetime", Vec::new(), IndexMap::new()));
    let weak = Arc::downgrade(&class);

    class.set_attr(
        "__init__",
        Value::builtin("__init__", Arity::Range(4, 8), |_, args| {
            let instance = receiver(&args)?;
            for (i, name) in FIELDS.iter().enumerate() {
                let value = match args.get(i + 1, name) {
                    Some(value) => value.as_int().ok_or_else(|| {
                        RuntimeError::TypeError(format!("'{}' must be an integer", name))
                    })?,
                    None => 0,
                };
                instance.set_attr(*name, Value::Int(value));
            }
            naive_of(instance)?;
            Ok(Value::None)
        }),
    );
    let now_class = weak.clone();
    class.set_attr(
        "now",
        Value::builtin("now", Arity::Range(0, 1), move |_, _| {
            instance_of(&now_class, Local::now().naive_local())
        }),
    );
    let utc_class = weak.clone();
    class.set_attr(
        "utcnow",
        Value::builtin("utcnow", Arity::Fixed(0), move |_, _| {
            instance_of(&utc_class, Utc::now().naive_utc())
        }),
    );
    let parse_class = weak;
    class.set_attr(
        "fromisoformat",
        Value::builtin("fromisoformat", Arity::Fixed(1), move |_, args| {
            let text = args.positional[0].as_str().unwrap_or_default();
            let parsed = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").ok())
                .or_else(|| {
                    NaiveDate::parse_from_str(text, "%Y-%m-%d")
                        .ok()
                        .and_then(|date| date.and_hms_opt(0, 0, 0))
                })
                .ok_or_else(|| {
                    RuntimeError::ValueError(format!("Invalid isoformat string: '{}'", text))
                })?;
            instance_of(&parse_class, parsed)
        }),
    );
    class.set_attr(
        "isoformat",
        Value::builtin("isoformat", Arity::Range(1, 2), |_, args| {
            let separator = args
                .get(1, "sep")
                .and_then(Value::as_str)
                .and_then(|s| s.chars().next())
                .unwrap_or('T');
            Ok(Value::Str(iso(&naive_of(receiver(&args)?)?, separator)))
        }),
    );
    class.set_attr(
        "__str__",
        Value::builtin("__str__", Arity::Fixed(1), |_, args| {
            Ok(Value::Str(iso(&naive_of(receiver(&args)?)?, ' ')))
        }),
    );
    class.set_attr(
        "timestamp",
        Value::builtin("timestamp", Arity::Fixed(1), |_, args| {
            let dt = naive_of(receiver(&args)?)?;
            let local = Local
                .from_local_datetime(&dt)
                .earliest()
                .ok_or_else(|| RuntimeError::ValueError("nonexistent local time".into()))?;
            Ok(Value::Float(local.timestamp_micros() as f64 / 1e6))
        }),
    );
    class.set_attr(
        "strftime",
        Value::builtin("strftime", Arity::Fixed(2), |_, args| {
            let dt = naive_of(receiver(&args)?)?;
            let format = args.positional[1].as_str().ok_or_else(|| {
                RuntimeError::TypeError("strftime() argument 1 must be str".into())
            })?;
            strftime(&dt, format).map(Value::Str)
        }),
    );
    class
}

pub(super) fn module() -> Module {
    build_module("datetime", vec![("datetime", Value::Class(datetime_class()))])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_and_strftime() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_micro_opt(7, 8, 9, 1500)
            .unwrap();
        assert_eq!(iso(&dt, 'T'), "2024-03-05T07:08:09.001500");
        assert_eq!(strftime(&dt, "%Y/%m/%d").unwrap(), "2024/03/05");
        assert!(strftime(&dt, "%Q").is_err());
    }

    #[test]
    fn test_fields_round_trip_through_instance() {
        let class = datetime_class();
        let instance = Instance::new(class);
        let dt = NaiveDate::from_ymd_opt(1999, 12, 31)
            .unwrap()
            .and_hms_opt(23, 59, 58)
            .unwrap();
        store(&instance, &dt);
        assert_eq!(naive_of(&instance).unwrap(), dt);
    }
}
