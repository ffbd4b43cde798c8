//! Builtin functions.

use regex::RegexBuilder;
use serde_json::{Map, Value};

use super::eval::{
    EvalResult, as_number, binary, compare, equals, eval, eval_first, index, iterate, number, stringify,
    truthy, type_name,
};
use super::parser::{Ast, BinOp};

pub(super) fn call(name: &str, args: &[Ast], input: &Value) -> EvalResult {
    match (name, args) {
        ("empty", []) => Ok(Vec::new()),
        ("not", []) => one(Value::Bool(!truthy(input))),
        ("type", []) => one(Value::String(type_name(input).into())),
        ("length", []) => length(input).and_then(one),
        ("keys", []) => keys(input, true).and_then(one),
        ("keys_unsorted", []) => keys(input, false).and_then(one),
        ("values", []) => Ok(if input.is_null() {
            Vec::new()
        } else {
            vec![input.clone()]
        }),
        ("add", []) => add(input).and_then(one),
        ("any", []) => one(Value::Bool(iterate(input)?.iter().any(truthy))),
        ("all", []) => one(Value::Bool(iterate(input)?.iter().all(truthy))),
        ("any", [cond]) => {
            let mut found = false;
            for item in iterate(input)? {
                if eval(cond, &item)?.iter().any(truthy) {
                    found = true;
                    break;
                }
            }
            one(Value::Bool(found))
        }
        ("all", [cond]) => {
            let mut holds = true;
            for item in iterate(input)? {
                if !eval(cond, &item)?.iter().all(truthy) {
                    holds = false;
                    break;
                }
            }
            one(Value::Bool(holds))
        }
        ("first", []) => index(input, &Value::from(0)).and_then(one),
        ("last", []) => index(input, &Value::from(-1)).and_then(one),
        ("first", [f]) => Ok(eval_first(f, input)?.into_iter().collect()),
        ("last", [f]) => Ok(eval(f, input)?.pop().into_iter().collect()),
        ("select", [cond]) => Ok(eval(cond, input)?
            .iter()
            .filter(|v| truthy(v))
            .map(|_| input.clone())
            .collect()),
        ("map", [f]) => {
            let mut out = Vec::new();
            for item in iterate(input)? {
                out.extend(eval(f, &item)?);
            }
            one(Value::Array(out))
        }
        ("map_values", [f]) => map_values(f, input).and_then(one),
        ("has", [key]) => each_arg(key, input, |key| has(input, key)),
        ("contains", [other]) => {
            each_arg(other, input, |other| Ok(Value::Bool(contains(input, other)?)))
        }
        ("to_entries", []) => to_entries(input).and_then(one),
        ("from_entries", []) => from_entries(input).and_then(one),
        ("with_entries", [f]) => {
            let Value::Array(entries) = to_entries(input)? else {
                return Err("to_entries produced a non-array".into());
            };
            let mut mapped = Vec::new();
            for entry in entries {
                mapped.extend(eval(f, &entry)?);
            }
            from_entries(&Value::Array(mapped)).and_then(one)
        }
        ("tostring", []) => one(Value::String(stringify(input))),
        ("tonumber", []) => match input {
            Value::Number(_) => one(input.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("cannot parse '{s}' as a number"))
                .and_then(|n| one(number(n))),
            other => Err(format!("{} cannot be parsed as a number", type_name(other))),
        },
        ("tojson", []) => one(Value::String(input.to_string())),
        ("fromjson", []) => {
            let text = expect_str(input, "fromjson")?;
            serde_json::from_str(text)
                .map_err(|e| format!("{text} cannot be parsed as JSON: {e}"))
                .and_then(one)
        }
        ("ascii_downcase", []) => {
            one(Value::String(expect_str(input, "ascii_downcase")?.to_ascii_lowercase()))
        }
        ("ascii_upcase", []) => {
            one(Value::String(expect_str(input, "ascii_upcase")?.to_ascii_uppercase()))
        }
        ("split", [sep]) => each_arg(sep, input, |sep| {
            let text = expect_str(input, "split")?;
            Ok(split(text, expect_str(sep, "split")?))
        }),
        ("join", [sep]) => each_arg(sep, input, |sep| join(input, expect_str(sep, "join")?)),
        ("test", [re]) => each_arg(re, input, |re| test(input, re, &Value::Null)),
        ("test", [re, flags]) => {
            let flags = eval(flags, input)?;
            let mut out = Vec::new();
            for re in eval(re, input)? {
                for flag in &flags {
                    out.push(test(input, &re, flag)?);
                }
            }
            Ok(out)
        }
        ("startswith", [prefix]) => each_arg(prefix, input, |prefix| {
            let text = expect_str(input, "startswith")?;
            Ok(Value::Bool(text.starts_with(expect_str(prefix, "startswith")?)))
        }),
        ("endswith", [suffix]) => each_arg(suffix, input, |suffix| {
            let text = expect_str(input, "endswith")?;
            Ok(Value::Bool(text.ends_with(expect_str(suffix, "endswith")?)))
        }),
        ("ltrimstr", [prefix]) => each_arg(prefix, input, |prefix| {
            Ok(match (input, prefix) {
                (Value::String(text), Value::String(prefix)) => Value::String(
                    text.strip_prefix(prefix.as_str())
                        .unwrap_or(text)
                        .to_string(),
                ),
                _ => input.clone(),
            })
        }),
        ("rtrimstr", [suffix]) => each_arg(suffix, input, |suffix| {
            Ok(match (input, suffix) {
                (Value::String(text), Value::String(suffix)) => Value::String(
                    text.strip_suffix(suffix.as_str())
                        .unwrap_or(text)
                        .to_string(),
                ),
                _ => input.clone(),
            })
        }),
        ("sort", []) => {
            let mut items = expect_array(input, "sort")?.clone();
            items.sort_by(compare);
            one(Value::Array(items))
        }
        ("sort_by", [f]) => {
            let items = expect_array(input, "sort_by")?;
            let mut keyed = Vec::with_capacity(items.len());
            for item in items {
                keyed.push((Value::Array(eval(f, item)?), item.clone()));
            }
            keyed.sort_by(|a, b| compare(&a.0, &b.0));
            one(Value::Array(keyed.into_iter().map(|(_, v)| v).collect()))
        }
        ("unique", []) => {
            let mut items = expect_array(input, "unique")?.clone();
            items.sort_by(compare);
            items.dedup_by(|a, b| equals(a, b));
            one(Value::Array(items))
        }
        ("reverse", []) => match input {
            Value::Null => one(Value::Array(Vec::new())),
            Value::String(s) => one(Value::String(s.chars().rev().collect())),
            Value::Array(items) => one(Value::Array(items.iter().rev().cloned().collect())),
            other => Err(format!("cannot reverse {}", type_name(other))),
        },
        ("flatten", []) => flatten(input, usize::MAX).and_then(one),
        ("flatten", [depth]) => each_arg(depth, input, |depth| match as_number(depth) {
            Some(d) if d >= 0.0 => flatten(input, d as usize),
            _ => Err("flatten depth must not be negative".into()),
        }),
        ("min", []) => one(
            expect_array(input, "min")?
                .iter()
                .min_by(|a, b| compare(a, b))
                .cloned()
                .unwrap_or(Value::Null),
        ),
        ("max", []) => one(
            expect_array(input, "max")?
                .iter()
                .max_by(|a, b| compare(a, b))
                .cloned()
                .unwrap_or(Value::Null),
        ),
        ("error", []) => Err(stringify(input)),
        ("error", [message]) => {
            let message = eval(message, input)?;
            Err(message.first().map(stringify).unwrap_or_else(|| "null".into()))
        }
        (name, args) => Err(format!("{name}/{} is not defined", args.len())),
    }
}

fn one(value: Value) -> EvalResult {
    Ok(vec![value])
}

/// Evaluate a single argument and apply `f` to each of its outputs.
fn each_arg(
    arg: &Ast,
    input: &Value,
    mut f: impl FnMut(&Value) -> Result<Value, String>,
) -> EvalResult {
    eval(arg, input)?.iter().map(|value| f(value)).collect()
}

fn expect_str<'a>(value: &'a Value, func: &str) -> Result<&'a str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("{func} input must be a string, got {}", type_name(value)))
}

fn expect_array<'a>(value: &'a Value, func: &str) -> Result<&'a Vec<Value>, String> {
    value
        .as_array()
        .ok_or_else(|| format!("{func} input must be an array, got {}", type_name(value)))
}

fn length(value: &Value) -> Result<Value, String> {
    Ok(match value {
        Value::Null => Value::from(0),
        Value::Bool(_) => return Err("boolean has no length".into()),
        Value::Number(n) => number(n.as_f64().unwrap_or(0.0).abs()),
        Value::String(s) => Value::from(s.chars().count()),
        Value::Array(items) => Value::from(items.len()),
        Value::Object(map) => Value::from(map.len()),
    })
}

fn keys(value: &Value, sorted: bool) -> Result<Value, String> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            if sorted {
                keys.sort();
            }
            Ok(Value::Array(keys.into_iter().cloned().map(Value::String).collect()))
        }
        Value::Array(items) => Ok(Value::Array((0..items.len()).map(Value::from).collect())),
        other => Err(format!("{} has no keys", type_name(other))),
    }
}

fn has(value: &Value, key: &Value) -> Result<Value, String> {
    match (value, key) {
        (Value::Object(map), Value::String(k)) => Ok(Value::Bool(map.contains_key(k))),
        (Value::Array(items), Value::Number(n)) => {
            let idx = n.as_f64().unwrap_or(-1.0);
            Ok(Value::Bool(idx >= 0.0 && (idx as usize) < items.len()))
        }
        _ => Err(format!(
            "cannot check whether {} has a {} key",
            type_name(value),
            type_name(key)
        )),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, String> {
    match (haystack, needle) {
        (Value::String(a), Value::String(b)) => Ok(a.contains(b.as_str())),
        (Value::Array(a), Value::Array(b)) => {
            for wanted in b {
                let mut found = false;
                for item in a {
                    if contains(item, wanted).unwrap_or(false) {
                        found = true;
                        break;
                    }
                }
                if !found {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Object(a), Value::Object(b)) => {
            for (key, wanted) in b {
                let Some(item) = a.get(key) else {
                    return Ok(false);
                };
                if !contains(item, wanted)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ if type_name(haystack) == type_name(needle) => Ok(equals(haystack, needle)),
        _ => Err(format!(
            "{} and {} cannot have their containment checked",
            type_name(haystack),
            type_name(needle)
        )),
    }
}

fn add(value: &Value) -> Result<Value, String> {
    let items = match value {
        Value::Null => return Ok(Value::Null),
        Value::Object(map) => map.values().cloned().collect(),
        other => expect_array(other, "add")?.clone(),
    };
    let mut acc = Value::Null;
    for item in &items {
        acc = binary(BinOp::Add, &acc, item)?;
    }
    Ok(acc)
}

fn map_values(f: &Ast, value: &Value) -> Result<Value, String> {
    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(mapped) = eval(f, item)?.into_iter().next() {
                    out.push(mapped);
                }
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, item) in map {
                if let Some(mapped) = eval(f, item)?.into_iter().next() {
                    out.insert(key.clone(), mapped);
                }
            }
            Ok(Value::Object(out))
        }
        other => Err(format!("cannot iterate over {}", type_name(other))),
    }
}

fn to_entries(value: &Value) -> Result<Value, String> {
    let Value::Object(map) = value else {
        return Err(format!("{} has no entries", type_name(value)));
    };
    Ok(Value::Array(
        map.iter()
            .map(|(k, v)| {
                let mut entry = Map::new();
                entry.insert("key".into(), Value::String(k.clone()));
                entry.insert("value".into(), v.clone());
                Value::Object(entry)
            })
            .collect(),
    ))
}

fn from_entries(value: &Value) -> Result<Value, String> {
    let mut out = Map::new();
    for entry in expect_array(value, "from_entries")? {
        let key = ["key", "k", "name", "Name", "Key", "K"]
            .iter()
            .find_map(|field| entry.get(field).filter(|v| !v.is_null()))
            .ok_or_else(|| "from_entries entry has no key".to_string())?;
        let value = ["value", "v", "Value", "V"]
            .iter()
            .find_map(|field| entry.get(field))
            .cloned()
            .unwrap_or(Value::Null);
        out.insert(stringify(key), value);
    }
    Ok(Value::Object(out))
}

pub(super) fn split(text: &str, sep: &str) -> Value {
    let parts: Vec<Value> = if text.is_empty() {
        Vec::new()
    } else if sep.is_empty() {
        text.chars().map(|c| Value::String(c.to_string())).collect()
    } else {
        text.split(sep).map(|s| Value::String(s.into())).collect()
    };
    Value::Array(parts)
}

fn join(value: &Value, sep: &str) -> Result<Value, String> {
    let mut parts = Vec::new();
    for item in expect_array(value, "join")? {
        parts.push(match item {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Number(_) | Value::Bool(_) => item.to_string(),
            other => return Err(format!("cannot join with {}", type_name(other))),
        });
    }
    Ok(Value::String(parts.join(sep)))
}

fn test(value: &Value, pattern: &Value, flags: &Value) -> Result<Value, String> {
    let text = expect_str(value, "test")?;
    let pattern = expect_str(pattern, "test")?;
    let flags = match flags {
        Value::Null => "",
        other => expect_str(other, "test")?,
    };
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .ignore_whitespace(flags.contains('x'))
        .build()
        .map_err(|e| format!("invalid regex '{pattern}': {e}"))?;
    Ok(Value::Bool(regex.is_match(text)))
}

fn flatten(value: &Value, depth: usize) -> Result<Value, String> {
    fn walk(items: &[Value], depth: usize, out: &mut Vec<Value>) {
        for item in items {
            match item {
                Value::Array(inner) if depth > 0 => walk(inner, depth - 1, out),
                other => out.push(other.clone()),
            }
        }
    }

    let mut out = Vec::new();
    walk(expect_array(value, "flatten")?, depth, &mut out);
    Ok(Value::Array(out))
}
