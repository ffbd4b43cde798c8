//! Tree-walking evaluator.
//!
//! Every expression maps one input to a list of outputs. Errors are plain
//! strings here and get their expression context attached by the caller.

use std::cmp::Ordering;
use std::ops::ControlFlow;

use serde_json::{Map, Number, Value};

use super::builtins;
use super::parser::{Ast, BinOp, StrSegment};

pub(super) type EvalResult = Result<Vec<Value>, String>;

/// Upper bound on the byte length of a repeated string.
const MAX_REPEAT_LEN: usize = 64 * 1024 * 1024;

/// Build a JSON number, keeping integral values as integers.
pub(super) fn number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

pub(super) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Truthiness inside expressions: only `null` and `false` are false.
pub(super) fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Total order over values: null < false < true < numbers < strings < arrays < objects.
pub(super) fn compare(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(false) => 1,
            Value::Bool(true) => 2,
            Value::Number(_) => 3,
            Value::String(_) => 4,
            Value::Array(_) => 5,
            Value::Object(_) => 6,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Less)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut xk: Vec<&String> = x.keys().collect();
            let mut yk: Vec<&String> = y.keys().collect();
            xk.sort();
            yk.sort();
            match xk.cmp(&yk) {
                Ordering::Equal => {}
                ord => return ord,
            }
            for key in xk {
                let ord = compare(&x[key], &y[key]);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

pub(super) fn equals(a: &Value, b: &Value) -> bool {
    compare(a, b) == Ordering::Equal
}

pub(super) fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// `tostring` semantics: strings stay raw, everything else is JSON.
pub(super) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Receives outputs one at a time; `Break` stops the producer.
type Emit<'a> = dyn FnMut(Value) -> Result<ControlFlow<()>, String> + 'a;

type Flow = Result<ControlFlow<()>, String>;

/// All outputs of `ast` for `input`.
pub(super) fn eval(ast: &Ast, input: &Value) -> EvalResult {
    let mut out = Vec::new();
    each(ast, input, &mut |value| {
        out.push(value);
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(out)
}

/// First output of `ast` for `input`. Outputs past the first are never
/// produced, so their errors cannot surface.
pub(super) fn eval_first(ast: &Ast, input: &Value) -> Result<Option<Value>, String> {
    let mut first = None;
    each(ast, input, &mut |value| {
        first = Some(value);
        Ok(ControlFlow::Break(()))
    })?;
    Ok(first)
}

fn emit_all(values: Vec<Value>, emit: &mut Emit<'_>) -> Flow {
    for value in values {
        if emit(value)?.is_break() {
            return Ok(ControlFlow::Break(()));
        }
    }
    Ok(ControlFlow::Continue(()))
}

fn each(ast: &Ast, input: &Value, emit: &mut Emit<'_>) -> Flow {
    match ast {
        Ast::Identity => emit(input.clone()),
        Ast::Recurse => {
            let mut out = Vec::new();
            recurse(input, &mut out);
            emit_all(out, emit)
        }
        Ast::Literal(value) => emit(value.clone()),
        Ast::Str(segments) => emit_all(interpolate(segments, input)?, emit),
        Ast::Index(target, key) => {
            let keys = eval(key, input)?;
            each(target, input, &mut |value| {
                let values = keys
                    .iter()
                    .map(|key| index(&value, key))
                    .collect::<Result<Vec<_>, _>>()?;
                emit_all(values, emit)
            })
        }
        Ast::Slice(target, start, end) => {
            let starts = match start {
                Some(start) => eval(start, input)?,
                None => vec![Value::Null],
            };
            let ends = match end {
                Some(end) => eval(end, input)?,
                None => vec![Value::Null],
            };
            each(target, input, &mut |value| {
                let mut out = Vec::with_capacity(starts.len() * ends.len());
                for start in &starts {
                    for end in &ends {
                        out.push(slice(&value, start, end)?);
                    }
                }
                emit_all(out, emit)
            })
        }
        Ast::Iterate(target) => each(target, input, &mut |value| emit_all(iterate(&value)?, emit)),
        Ast::Try(inner) => {
            // Errors raised downstream of the try body still propagate.
            let mut downstream = None;
            let flow = each(inner, input, &mut |value| match emit(value) {
                Ok(flow) => Ok(flow),
                Err(e) => {
                    downstream = Some(e);
                    Ok(ControlFlow::Break(()))
                }
            });
            match (downstream, flow) {
                (Some(e), _) => Err(e),
                (None, Ok(flow)) => Ok(flow),
                (None, Err(_)) => Ok(ControlFlow::Continue(())),
            }
        }
        Ast::Array(None) => emit(Value::Array(Vec::new())),
        Ast::Array(Some(inner)) => emit(Value::Array(eval(inner, input)?)),
        Ast::Object(entries) => emit_all(object(entries, input)?, emit),
        Ast::Pipe(lhs, rhs) => each(lhs, input, &mut |value| each(rhs, &value, emit)),
        Ast::Comma(lhs, rhs) => {
            if each(lhs, input, emit)?.is_break() {
                return Ok(ControlFlow::Break(()));
            }
            each(rhs, input, emit)
        }
        Ast::Alt(lhs, rhs) => {
            let values: Vec<Value> = eval(lhs, input)
                .unwrap_or_default()
                .into_iter()
                .filter(truthy)
                .collect();
            if values.is_empty() {
                each(rhs, input, emit)
            } else {
                emit_all(values, emit)
            }
        }
        Ast::And(lhs, rhs) => each(lhs, input, &mut |left| {
            if !truthy(&left) {
                return emit(Value::Bool(false));
            }
            each(rhs, input, &mut |right| emit(Value::Bool(truthy(&right))))
        }),
        Ast::Or(lhs, rhs) => each(lhs, input, &mut |left| {
            if truthy(&left) {
                return emit(Value::Bool(true));
            }
            each(rhs, input, &mut |right| emit(Value::Bool(truthy(&right))))
        }),
        Ast::Binary(op, lhs, rhs) => each(rhs, input, &mut |right| {
            each(lhs, input, &mut |left| emit(binary(*op, &left, &right)?))
        }),
        Ast::Neg(inner) => each(inner, input, &mut |value| match as_number(&value) {
            Some(n) => emit(number(-n)),
            None => Err(format!("{} cannot be negated", type_name(&value))),
        }),
        Ast::If {
            cond,
            then,
            otherwise,
        } => each(cond, input, &mut |value| {
            if truthy(&value) {
                each(then, input, emit)
            } else if let Some(otherwise) = otherwise {
                each(otherwise, input, emit)
            } else {
                emit(input.clone())
            }
        }),
        Ast::Call(name, args) => emit_all(builtins::call(name, args, input)?, emit),
    }
}

fn recurse(value: &Value, out: &mut Vec<Value>) {
    out.push(value.clone());
    match value {
        Value::Array(items) => items.iter().for_each(|item| recurse(item, out)),
        Value::Object(map) => map.values().for_each(|item| recurse(item, out)),
        _ => {}
    }
}

fn interpolate(segments: &[StrSegment], input: &Value) -> EvalResult {
    let mut prefixes = vec![String::new()];
    for segment in segments {
        match segment {
            StrSegment::Lit(text) => prefixes.iter_mut().for_each(|p| p.push_str(text)),
            StrSegment::Interp(ast) => {
                let values = eval(ast, input)?;
                prefixes = prefixes
                    .iter()
                    .flat_map(|prefix| {
                        values
                            .iter()
                            .map(move |value| format!("{prefix}{}", stringify(value)))
                    })
                    .collect();
            }
        }
    }
    Ok(prefixes.into_iter().map(Value::String).collect())
}

fn object(entries: &[(Ast, Ast)], input: &Value) -> EvalResult {
    let mut objects = vec![Map::new()];
    for (key, value) in entries {
        let keys = eval(key, input)?;
        let values = eval(value, input)?;
        let mut next = Vec::with_capacity(objects.len() * keys.len() * values.len());
        for object in &objects {
            for key in &keys {
                let Value::String(key) = key else {
                    return Err(format!("object keys must be strings, got {}", type_name(key)));
                };
                for value in &values {
                    let mut object = object.clone();
                    object.insert(key.clone(), value.clone());
                    next.push(object);
                }
            }
        }
        objects = next;
    }
    Ok(objects.into_iter().map(Value::Object).collect())
}

/// Resolve a possibly negative index against a length.
fn resolve_index(n: f64, len: usize) -> Option<usize> {
    let n = n.floor() as i64;
    let idx = if n < 0 { len as i64 + n } else { n };
    (0..len as i64).contains(&idx).then_some(idx as usize)
}

pub(super) fn index(value: &Value, key: &Value) -> Result<Value, String> {
    match (value, key) {
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Array(items), Value::Number(n)) => Ok(resolve_index(n.as_f64().unwrap_or(0.0), items.len())
            .map(|i| items[i].clone())
            .unwrap_or(Value::Null)),
        (Value::Null, Value::String(_) | Value::Number(_) | Value::Null) => Ok(Value::Null),
        _ => Err(format!(
            "cannot index {} with {}",
            type_name(value),
            type_name(key)
        )),
    }
}

fn slice_bounds(start: &Value, end: &Value, len: usize) -> Result<(usize, usize), String> {
    let clamp = |bound: &Value, default: usize| -> Result<usize, String> {
        match bound {
            Value::Null => Ok(default),
            Value::Number(n) => {
                let n = n.as_f64().unwrap_or(0.0).floor() as i64;
                let idx = if n < 0 { len as i64 + n } else { n };
                Ok(idx.clamp(0, len as i64) as usize)
            }
            other => Err(format!("slice bounds must be numbers, got {}", type_name(other))),
        }
    };
    let start = clamp(start, 0)?;
    let end = clamp(end, len)?.max(start);
    Ok((start, end))
}

fn slice(value: &Value, start: &Value, end: &Value) -> Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Array(items) => {
            let (s, e) = slice_bounds(start, end, items.len())?;
            Ok(Value::Array(items[s..e].to_vec()))
        }
        Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let (s, e) = slice_bounds(start, end, chars.len())?;
            Ok(Value::String(chars[s..e].iter().collect()))
        }
        other => Err(format!("cannot slice {}", type_name(other))),
    }
}

pub(super) fn iterate(value: &Value) -> Result<Vec<Value>, String> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(map) => Ok(map.values().cloned().collect()),
        other => Err(format!("cannot iterate over {}", type_name(other))),
    }
}

fn deep_merge(mut base: Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        let merged = match (base.remove(key), value) {
            (Some(Value::Object(left)), Value::Object(right)) => {
                Value::Object(deep_merge(left, right))
            }
            (_, value) => value.clone(),
        };
        base.insert(key.clone(), merged);
    }
    base
}

pub(super) fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, String> {
    let mismatch = |verb: &str| {
        format!(
            "{} and {} cannot be {verb}",
            type_name(left),
            type_name(right)
        )
    };

    match op {
        BinOp::Eq => return Ok(Value::Bool(equals(left, right))),
        BinOp::Ne => return Ok(Value::Bool(!equals(left, right))),
        BinOp::Lt => return Ok(Value::Bool(compare(left, right) == Ordering::Less)),
        BinOp::Le => return Ok(Value::Bool(compare(left, right) != Ordering::Greater)),
        BinOp::Gt => return Ok(Value::Bool(compare(left, right) == Ordering::Greater)),
        BinOp::Ge => return Ok(Value::Bool(compare(left, right) != Ordering::Less)),
        _ => {}
    }

    match (op, left, right) {
        (BinOp::Add, Value::Null, other) | (BinOp::Add, other, Value::Null) => Ok(other.clone()),
        (BinOp::Add, Value::Number(a), Value::Number(b)) => {
            Ok(number(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0)))
        }
        (BinOp::Add, Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (BinOp::Add, Value::Array(a), Value::Array(b)) => {
            Ok(Value::Array(a.iter().chain(b).cloned().collect()))
        }
        (BinOp::Add, Value::Object(a), Value::Object(b)) => {
            let mut merged = a.clone();
            merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(Value::Object(merged))
        }
        (BinOp::Add, _, _) => Err(mismatch("added")),

        (BinOp::Sub, Value::Number(a), Value::Number(b)) => {
            Ok(number(a.as_f64().unwrap_or(0.0) - b.as_f64().unwrap_or(0.0)))
        }
        (BinOp::Sub, Value::Array(a), Value::Array(b)) => Ok(Value::Array(
            a.iter()
                .filter(|item| !b.iter().any(|other| equals(item, other)))
                .cloned()
                .collect(),
        )),
        (BinOp::Sub, _, _) => Err(mismatch("subtracted")),

        (BinOp::Mul, Value::Number(a), Value::Number(b)) => {
            Ok(number(a.as_f64().unwrap_or(0.0) * b.as_f64().unwrap_or(0.0)))
        }
        (BinOp::Mul, Value::Object(a), Value::Object(b)) => {
            Ok(Value::Object(deep_merge(a.clone(), b)))
        }
        (BinOp::Mul, Value::String(s), Value::Number(n))
        | (BinOp::Mul, Value::Number(n), Value::String(s)) => {
            let times = n.as_f64().unwrap_or(0.0);
            if times <= 0.0 {
                return Ok(Value::Null);
            }
            let count = times.ceil() as usize;
            match s.len().checked_mul(count) {
                Some(len) if len <= MAX_REPEAT_LEN => Ok(Value::String(s.repeat(count))),
                _ => Err(format!("cannot repeat string {count} times: result too long")),
            }
        }
        (BinOp::Mul, _, _) => Err(mismatch("multiplied")),

        (BinOp::Div, Value::Number(a), Value::Number(b)) => {
            let divisor = b.as_f64().unwrap_or(0.0);
            if divisor == 0.0 {
                return Err(format!("{left} and {right} cannot be divided because the divisor is zero"));
            }
            Ok(number(a.as_f64().unwrap_or(0.0) / divisor))
        }
        (BinOp::Div, Value::String(a), Value::String(b)) => Ok(builtins::split(a, b)),
        (BinOp::Div, _, _) => Err(mismatch("divided")),

        (BinOp::Mod, Value::Number(a), Value::Number(b)) => {
            let divisor = b.as_f64().unwrap_or(0.0) as i64;
            if divisor == 0 {
                return Err(format!("{left} and {right} cannot be divided because the divisor is zero"));
            }
            let dividend = a.as_f64().unwrap_or(0.0) as i64;
            // Only i64::MIN % -1 overflows, and its remainder is zero.
            Ok(Value::Number(Number::from(dividend.checked_rem(divisor).unwrap_or(0))))
        }
        (BinOp::Mod, _, _) => Err(mismatch("divided")),

        _ => Err(mismatch("compared")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_keeps_integers() {
        assert_eq!(number(3.0), json!(3));
        assert_eq!(number(1.5), json!(1.5));
        assert_eq!(number(f64::NAN), Value::Null);
    }

    #[test]
    fn test_ordering_across_types() {
        let ordered = [
            json!(null),
            json!(false),
            json!(true),
            json!(-1),
            json!(2.5),
            json!("a"),
            json!([1]),
            json!({"a": 1}),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(compare(&pair[0], &pair[1]), Ordering::Less, "{pair:?}");
        }
        assert!(equals(&json!(1), &json!(1.0)));
    }

    #[test]
    fn test_index_negative_and_null() {
        assert_eq!(index(&json!([1, 2, 3]), &json!(-1)).unwrap(), json!(3));
        assert_eq!(index(&json!([1]), &json!(5)).unwrap(), Value::Null);
        assert_eq!(index(&Value::Null, &json!("a")).unwrap(), Value::Null);
        assert!(index(&json!("s"), &json!("a")).is_err());
    }

    #[test]
    fn test_string_repeat_is_bounded() {
        assert_eq!(binary(BinOp::Mul, &json!("ab"), &json!(3)).unwrap(), json!("ababab"));
        assert_eq!(binary(BinOp::Mul, &json!("ab"), &json!(0)).unwrap(), Value::Null);
        assert!(binary(BinOp::Mul, &json!("ab"), &json!(1e19)).is_err());
        assert!(binary(BinOp::Mul, &json!(1e19), &json!("ab")).is_err());
    }

    #[test]
    fn test_modulo_extreme_divisors() {
        let min = json!(i64::MIN);
        assert_eq!(binary(BinOp::Mod, &json!(7), &min).unwrap(), json!(7));
        assert_eq!(binary(BinOp::Mod, &min, &json!(-1)).unwrap(), json!(0));
        assert_eq!(binary(BinOp::Mod, &json!(-7), &json!(3)).unwrap(), json!(-1));
        assert!(binary(BinOp::Mod, &json!(1), &json!(0)).is_err());
    }

    #[test]
    fn test_first_stops_before_failing_output() {
        use super::super::{lexer, parser};
        let ast = lexer::tokenize(".[] | .x").and_then(parser::parse).unwrap();
        let input = json!([{"x": 1}, "bad"]);
        assert_eq!(eval_first(&ast, &input).unwrap(), Some(json!(1)));
        assert!(eval(&ast, &input).is_err());
    }

    #[test]
    fn test_object_multiplication_merges_deeply() {
        let merged = binary(
            BinOp::Mul,
            &json!({"a": {"b": 1, "c": 2}}),
            &json!({"a": {"c": 3}, "d": 4}),
        )
        .unwrap();
        assert_eq!(merged, json!({"a": {"b": 1, "c": 3}, "d": 4}));
    }
}
