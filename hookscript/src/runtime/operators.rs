//! Arithmetic, comparison and formatting on plain values.
//!
//! Nothing here calls back into guest code, so these functions take values
//! rather than an evaluator.

use std::cmp::Ordering;

use indexmap::IndexMap;

use super::error::{RuntimeError, RuntimeResult};
use super::values::{format_float, read_lock, write_lock, DictKey, Value};
use crate::ast::{BinaryOp, CompareOp};

pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> RuntimeResult<Value> {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub => sub(left, right),
        BinaryOp::Mul => mul(left, right),
        BinaryOp::Div => div(left, right),
        BinaryOp::FloorDiv => floor_div(left, right),
        BinaryOp::Mod => modulo(left, right),
        BinaryOp::Pow => pow(left, right),
        BinaryOp::BitOr => bit_or(left, right),
        BinaryOp::BitAnd => bit_and(left, right),
    }
}

/// Augmented assignment: lists are extended in place, everything else
/// rebinds to the result of the plain operator.
pub fn inplace(op: BinaryOp, left: &Value, right: &Value) -> RuntimeResult<Value> {
    if let (BinaryOp::Add, Value::List(items)) = (op, left) {
        let extra = match right {
            Value::List(other) => read_lock(other).clone(),
            Value::Tuple(other) => other.as_ref().clone(),
            _ => return binary(op, left, right),
        };
        write_lock(items).extend(extra);
        return Ok(left.clone());
    }
    binary(op, left, right)
}

fn unsupported(op: BinaryOp, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::TypeError(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn overflow() -> RuntimeError {
    RuntimeError::OverflowError("integer overflow".into())
}

/// Longest string (in bytes) or sequence a repetition may produce.
pub const MAX_REPEAT_LEN: usize = 1 << 24;

/// Rejects padding wider than [`MAX_REPEAT_LEN`].
pub(crate) fn padding_width(width: usize) -> RuntimeResult<usize> {
    if width > MAX_REPEAT_LEN {
        return Err(RuntimeError::MemoryError(format!(
            "padding of {} characters exceeds the limit of {}",
            width, MAX_REPEAT_LEN
        )));
    }
    Ok(width)
}

/// Validated repeat count for a sequence of `len` items.
fn repeat_count(len: usize, times: i64) -> RuntimeResult<usize> {
    let times = usize::try_from(times.max(0))
        .map_err(|_| RuntimeError::OverflowError("repeat count too large".into()))?;
    if len == 0 {
        return Ok(0);
    }
    let total = len
        .checked_mul(times)
        .ok_or_else(|| RuntimeError::OverflowError("repeated sequence is too long".into()))?;
    if total > MAX_REPEAT_LEN {
        return Err(RuntimeError::MemoryError(format!(
            "repeated sequence of {} items exceeds the limit of {}",
            total, MAX_REPEAT_LEN
        )));
    }
    Ok(times)
}

/// Both operands as ints, when neither is a float.
fn int_pair(left: &Value, right: &Value) -> Option<(i64, i64)> {
    Some((left.as_int()?, right.as_int()?))
}

fn float_pair(left: &Value, right: &Value) -> Option<(f64, f64)> {
    if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
        return None;
    }
    Some((left.as_float()?, right.as_float()?))
}

fn add(left: &Value, right: &Value) -> RuntimeResult<Value> {
    if let Some((a, b)) = int_pair(left, right) {
        return a.checked_add(b).map(Value::Int).ok_or_else(overflow);
    }
    if let Some((a, b)) = float_pair(left, right) {
        return Ok(Value::Float(a + b));
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        (Value::Str(_), other) => Err(RuntimeError::TypeError(format!(
            "can only concatenate str (not \"{}\") to str",
            other.type_name()
        ))),
        (Value::List(a), Value::List(b)) => {
            let mut items = read_lock(a).clone();
            items.extend(read_lock(b).iter().cloned());
            Ok(Value::list(items))
        }
        (Value::Tuple(a), Value::Tuple(b)) => {
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        _ => Err(unsupported(BinaryOp::Add, left, right)),
    }
}

fn sub(left: &Value, right: &Value) -> RuntimeResult<Value> {
    if let Some((a, b)) = int_pair(left, right) {
        return a.checked_sub(b).map(Value::Int).ok_or_else(overflow);
    }
    if let Some((a, b)) = float_pair(left, right) {
        return Ok(Value::Float(a - b));
    }
    match (left, right) {
        (Value::Set(a), Value::Set(b)) => {
            let b = read_lock(b).clone();
            Ok(Value::set(
                read_lock(a).iter().filter(|k| !b.contains(*k)).cloned().collect(),
            ))
        }
        _ => Err(unsupported(BinaryOp::Sub, left, right)),
    }
}

fn repeat<T: Clone>(items: &[T], times: i64) -> RuntimeResult<Vec<T>> {
    let times = repeat_count(items.len(), times)?;
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    Ok(out)
}

fn mul(left: &Value, right: &Value) -> RuntimeResult<Value> {
    if let Some((a, b)) = int_pair(left, right) {
        return a.checked_mul(b).map(Value::Int).ok_or_else(overflow);
    }
    if let Some((a, b)) = float_pair(left, right) {
        return Ok(Value::Float(a * b));
    }
    match (left, right) {
        (Value::Str(s), n) | (n, Value::Str(s)) if n.as_int().is_some() => {
            let times = repeat_count(s.len(), n.as_int().unwrap_or(0))?;
            Ok(Value::Str(s.repeat(times)))
        }
        (Value::List(items), n) | (n, Value::List(items)) if n.as_int().is_some() => {
            let items = read_lock(items).clone();
            Ok(Value::list(repeat(&items, n.as_int().unwrap_or(0))?))
        }
        (Value::Tuple(items), n) | (n, Value::Tuple(items)) if n.as_int().is_some() => {
            Ok(Value::tuple(repeat(items, n.as_int().unwrap_or(0))?))
        }
        _ => Err(unsupported(BinaryOp::Mul, left, right)),
    }
}

fn div(left: &Value, right: &Value) -> RuntimeResult<Value> {
    let (a, b) = float_pair(left, right).ok_or_else(|| unsupported(BinaryOp::Div, left, right))?;
    if b == 0.0 {
        return Err(RuntimeError::ZeroDivisionError("division by zero".into()));
    }
    Ok(Value::Float(a / b))
}

fn floor_div(left: &Value, right: &Value) -> RuntimeResult<Value> {
    if let Some((a, b)) = int_pair(left, right) {
        if b == 0 {
            return Err(RuntimeError::ZeroDivisionError(
                "integer division or modulo by zero".into(),
            ));
        }
        let mut q = a.checked_div(b).ok_or_else(overflow)?;
        if a % b != 0 && ((a < 0) != (b < 0)) {
            q -= 1;
        }
        return Ok(Value::Int(q));
    }
    let (a, b) =
        float_pair(left, right).ok_or_else(|| unsupported(BinaryOp::FloorDiv, left, right))?;
    if b == 0.0 {
        return Err(RuntimeError::ZeroDivisionError(
            "float floor division by zero".into(),
        ));
    }
    Ok(Value::Float((a / b).floor()))
}

fn modulo(left: &Value, right: &Value) -> RuntimeResult<Value> {
    if let Value::Str(format) = left {
        return percent_format(format, right).map(Value::Str);
    }
    if let Some((a, b)) = int_pair(left, right) {
        if b == 0 {
            return Err(RuntimeError::ZeroDivisionError(
                "integer division or modulo by zero".into(),
            ));
        }
        let mut r = a.checked_rem(b).ok_or_else(overflow)?;
        if r != 0 && ((r < 0) != (b < 0)) {
            r += b;
        }
        return Ok(Value::Int(r));
    }
    let (a, b) = float_pair(left, right).ok_or_else(|| unsupported(BinaryOp::Mod, left, right))?;
    if b == 0.0 {
        return Err(RuntimeError::ZeroDivisionError("float modulo".into()));
    }
    let mut r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r += b;
    }
    Ok(Value::Float(r))
}

fn pow(left: &Value, right: &Value) -> RuntimeResult<Value> {
    if let Some((a, b)) = int_pair(left, right) {
        if b >= 0 {
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            return a.checked_pow(exp).map(Value::Int).ok_or_else(overflow);
        }
        if a == 0 {
            return Err(RuntimeError::ZeroDivisionError(
                "0.0 cannot be raised to a negative power".into(),
            ));
        }
        return Ok(Value::Float((a as f64).powf(b as f64)));
    }
    let (a, b) = float_pair(left, right).ok_or_else(|| unsupported(BinaryOp::Pow, left, right))?;
    Ok(Value::Float(a.powf(b)))
}

fn bit_or(left: &Value, right: &Value) -> RuntimeResult<Value> {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a | b)),
        (Value::Dict(a), Value::Dict(b)) => {
            let mut merged = read_lock(a).clone();
            merged.extend(read_lock(b).iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(Value::dict(merged))
        }
        (Value::Set(a), Value::Set(b)) => {
            let mut merged = read_lock(a).clone();
            merged.extend(read_lock(b).iter().cloned());
            Ok(Value::set(merged))
        }
        _ => match int_pair(left, right) {
            Some((a, b)) => Ok(Value::Int(a | b)),
            None => Err(unsupported(BinaryOp::BitOr, left, right)),
        },
    }
}

fn bit_and(left: &Value, right: &Value) -> RuntimeResult<Value> {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a & b)),
        (Value::Set(a), Value::Set(b)) => {
            let b = read_lock(b).clone();
            Ok(Value::set(
                read_lock(a).iter().filter(|k| b.contains(*k)).cloned().collect(),
            ))
        }
        _ => match int_pair(left, right) {
            Some((a, b)) => Ok(Value::Int(a & b)),
            None => Err(unsupported(BinaryOp::BitAnd, left, right)),
        },
    }
}

pub fn negate(value: &Value) -> RuntimeResult<Value> {
    match value {
        Value::Float(f) => Ok(Value::Float(-f)),
        other => match other.as_int() {
            Some(i) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
            None => Err(RuntimeError::TypeError(format!(
                "bad operand type for unary -: '{}'",
                other.type_name()
            ))),
        },
    }
}

pub fn positive(value: &Value) -> RuntimeResult<Value> {
    match value {
        Value::Float(_) | Value::Int(_) => Ok(value.clone()),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        other => Err(RuntimeError::TypeError(format!(
            "bad operand type for unary +: '{}'",
            other.type_name()
        ))),
    }
}

// ---- comparison ----

pub fn compare(op: CompareOp, left: &Value, right: &Value) -> RuntimeResult<bool> {
    match op {
        CompareOp::Eq => Ok(values_equal(left, right)),
        CompareOp::NotEq => Ok(!values_equal(left, right)),
        CompareOp::Lt => Ok(ordered(op, left, right)? == Ordering::Less),
        CompareOp::LtE => Ok(ordered(op, left, right)? != Ordering::Greater),
        CompareOp::Gt => Ok(ordered(op, left, right)? == Ordering::Greater),
        CompareOp::GtE => Ok(ordered(op, left, right)? != Ordering::Less),
        CompareOp::In => contains(right, left),
        CompareOp::NotIn => contains(right, left).map(|found| !found),
        CompareOp::Is => Ok(left.is_same(right)),
        CompareOp::IsNot => Ok(!left.is_same(right)),
    }
}

fn ordered(op: CompareOp, left: &Value, right: &Value) -> RuntimeResult<Ordering> {
    order(left, right).map_err(|_| {
        RuntimeError::TypeError(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))
    })
}

/// Structural equality. Instances and callables compare by identity.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::None, Value::None) => true,
        (Value::List(a), Value::List(b)) => {
            let a = read_lock(a).clone();
            let b = read_lock(b).clone();
            sequences_equal(&a, &b)
        }
        (Value::Tuple(a), Value::Tuple(b)) => sequences_equal(a, b),
        (Value::Dict(a), Value::Dict(b)) => {
            let a = read_lock(a).clone();
            let b = read_lock(b).clone();
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).map(|other| values_equal(v, other)).unwrap_or(false))
        }
        (Value::Set(a), Value::Set(b)) => {
            let a = read_lock(a).clone();
            let b = read_lock(b).clone();
            a.len() == b.len() && a.iter().all(|k| b.contains(k))
        }
        (Value::Float(_), _) | (_, Value::Float(_)) => match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => match (left.as_int(), right.as_int()) {
            (Some(a), Some(b)) => a == b,
            _ => left.is_same(right),
        },
    }
}

fn sequences_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

/// Total order used by `<` and sorting.
pub fn order(left: &Value, right: &Value) -> RuntimeResult<Ordering> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) => {
            let a = read_lock(a).clone();
            let b = read_lock(b).clone();
            order_sequences(&a, &b)
        }
        (Value::Tuple(a), Value::Tuple(b)) => order_sequences(a, b),
        _ => {
            if let Some((a, b)) = int_pair(left, right) {
                return Ok(a.cmp(&b));
            }
            match float_pair(left, right) {
                Some((a, b)) => a.partial_cmp(&b).ok_or_else(|| {
                    RuntimeError::ValueError("cannot order NaN".into())
                }),
                None => Err(RuntimeError::TypeError(format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    left.type_name(),
                    right.type_name()
                ))),
            }
        }
    }
}

fn order_sequences(a: &[Value], b: &[Value]) -> RuntimeResult<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if values_equal(x, y) {
            continue;
        }
        return order(x, y);
    }
    Ok(a.len().cmp(&b.len()))
}

/// `item in container`
pub fn contains(container: &Value, item: &Value) -> RuntimeResult<bool> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(RuntimeError::TypeError(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => {
            let items = read_lock(items).clone();
            Ok(items.iter().any(|v| values_equal(v, item)))
        }
        Value::Tuple(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Dict(entries) => {
            let key = DictKey::from_value(item)?;
            Ok(read_lock(entries).contains_key(&key))
        }
        Value::Set(items) => {
            let key = DictKey::from_value(item)?;
            Ok(read_lock(items).contains(&key))
        }
        other => Err(RuntimeError::TypeError(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

// ---- slicing ----

/// Indices selected by `[lower:upper:step]` on a sequence of `len` items.
pub fn slice_indices(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> RuntimeResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(RuntimeError::ValueError("slice step cannot be zero".into()));
    }
    let len = len as i64;
    let clamp = |bound: i64, low: i64, high: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };
    let mut indices = Vec::new();
    if step > 0 {
        let start = lower.map(|b| clamp(b, 0, len)).unwrap_or(0);
        let stop = upper.map(|b| clamp(b, 0, len)).unwrap_or(len);
        let mut i = start;
        while i < stop {
            indices.push(i as usize);
            i += step;
        }
    } else {
        let start = lower.map(|b| clamp(b, -1, len - 1)).unwrap_or(len - 1);
        let stop = upper.map(|b| clamp(b, -1, len - 1)).unwrap_or(-1);
        let mut i = start;
        while i > stop {
            indices.push(i as usize);
            i += step;
        }
    }
    Ok(indices)
}

pub fn slice(
    value: &Value,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> RuntimeResult<Value> {
    match value {
        Value::List(items) => {
            let items = read_lock(items);
            let picked = slice_indices(items.len(), lower, upper, step)?
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(Value::list(picked))
        }
        Value::Tuple(items) => {
            let picked = slice_indices(items.len(), lower, upper, step)?
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(Value::tuple(picked))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len(), lower, upper, step)?
                .into_iter()
                .map(|i| chars[i])
                .collect();
            Ok(Value::Str(picked))
        }
        other => Err(RuntimeError::TypeError(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

// ---- formatting ----

#[derive(Debug, Default)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> RuntimeResult<FormatSpec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut parsed = FormatSpec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        parsed.fill = Some(chars[0]);
        parsed.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        parsed.align = Some(chars[0]);
        i = 1;
    }
    if i < chars.len() && matches!(chars[i], '+' | '-' | ' ') {
        parsed.sign = Some(chars[i]);
        i += 1;
    }
    if i < chars.len() && chars[i] == '0' {
        parsed.zero = true;
        i += 1;
    }
    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i > start {
        parsed.width = chars[start..i].iter().collect::<String>().parse().unwrap_or(0);
    }
    if i < chars.len() && chars[i] == ',' {
        parsed.grouping = true;
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return Err(RuntimeError::ValueError("Format specifier missing precision".into()));
        }
        parsed.precision = chars[start..i].iter().collect::<String>().parse().ok();
    }
    if i < chars.len() {
        parsed.kind = Some(chars[i]);
        i += 1;
    }
    if i != chars.len() {
        return Err(RuntimeError::ValueError(format!(
            "Invalid format specifier '{}'",
            spec
        )));
    }
    Ok(parsed)
}

fn group_thousands(digits: &str) -> String {
    let (int_part, rest) = match digits.find('.') {
        Some(pos) => digits.split_at(pos),
        None => (digits, ""),
    };
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped.push_str(rest);
    grouped
}

/// Applies a `format()`-style spec such as `>10`, `.2f` or `,`.
pub fn format_with_spec(value: &Value, spec: &str) -> RuntimeResult<String> {
    let spec = parse_spec(spec)?;
    let invalid = |kind: char| {
        RuntimeError::ValueError(format!(
            "Unknown format code '{}' for object of type '{}'",
            kind,
            value.type_name()
        ))
    };
    let numeric = matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_));

    let (negative, body) = match (spec.kind, value) {
        (None | Some('s'), Value::Str(s)) => {
            let text = match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.clone(),
            };
            (false, text)
        }
        (Some(kind @ ('d' | 'x' | 'X' | 'o' | 'b')), _) => {
            let Some(i) = (match value {
                Value::Float(_) => None,
                other => other.as_int(),
            }) else {
                return Err(invalid(kind));
            };
            let magnitude = i.unsigned_abs();
            let digits = match kind {
                'x' => format!("{:x}", magnitude),
                'X' => format!("{:X}", magnitude),
                'o' => format!("{:o}", magnitude),
                'b' => format!("{:b}", magnitude),
                _ => magnitude.to_string(),
            };
            (i < 0, digits)
        }
        (Some(kind @ ('f' | 'F' | 'e' | 'E' | '%' | 'g' | 'G')), _) | (Some(kind), Value::Float(_))
            if value.as_float().is_some() && !matches!(value, Value::Str(_)) =>
        {
            let f = value.as_float().unwrap_or(0.0);
            let precision = spec.precision.unwrap_or(6);
            let magnitude = f.abs();
            let digits = match kind {
                'f' | 'F' => format!("{:.*}", precision, magnitude),
                'e' => format!("{:.*e}", precision, magnitude),
                'E' => format!("{:.*E}", precision, magnitude),
                '%' => format!("{:.*}%", precision, magnitude * 100.0),
                'g' | 'G' => format_float(magnitude),
                _ => return Err(invalid(kind)),
            };
            (f.is_sign_negative() && f != 0.0, digits)
        }
        (None, Value::Float(f)) => {
            let digits = match spec.precision {
                Some(p) => format!("{:.*}", p, f.abs()),
                None => format_float(f.abs()),
            };
            (f.is_sign_negative() && *f != 0.0, digits)
        }
        (None, other) if numeric => {
            let i = other.as_int().unwrap_or(0);
            (i < 0, i.unsigned_abs().to_string())
        }
        (None, other) => (false, other.to_display_string()),
        (Some(kind), _) => return Err(invalid(kind)),
    };

    let body = if spec.grouping && numeric { group_thousands(&body) } else { body };
    let sign = match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    };

    let len = sign.chars().count() + body.chars().count();
    if len >= spec.width {
        return Ok(format!("{}{}", sign, body));
    }
    let pad = padding_width(spec.width - len)?;
    let (fill, align) = match (spec.fill, spec.align) {
        (fill, Some(align)) => (fill.unwrap_or(' '), align),
        (_, None) if spec.zero && numeric => ('0', '='),
        (_, None) if numeric => (' ', '>'),
        (_, None) => (' ', '<'),
    };
    let padding = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    Ok(match align {
        '<' => format!("{}{}{}", sign, body, padding(pad)),
        '^' => format!("{}{}{}{}", padding(pad / 2), sign, body, padding(pad - pad / 2)),
        '=' => format!("{}{}{}", sign, padding(pad), body),
        _ => format!("{}{}{}", padding(pad), sign, body),
    })
}

/// printf-style `format % args`.
pub fn percent_format(format: &str, args: &Value) -> RuntimeResult<String> {
    let mapping: Option<IndexMap<DictKey, Value>> = match args {
        Value::Dict(entries) => Some(read_lock(entries).clone()),
        _ => None,
    };
    let mut positional: Vec<Value> = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        Value::Dict(_) => Vec::new(),
        other => vec![other.clone()],
    };
    positional.reverse();

    let mut out = String::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut key = None;
        if chars.peek() == Some(&'(') {
            chars.next();
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == ')' {
                    break;
                }
                name.push(c);
            }
            key = Some(name);
        }
        let mut spec = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | ' ' | '0') {
                spec.push(c);
                chars.next();
            } else {
                break;
            }
        }
        let Some(conversion) = chars.next() else {
            return Err(RuntimeError::ValueError("incomplete format".into()));
        };
        if conversion == '%' {
            out.push('%');
            continue;
        }
        let value = match (&key, &mapping) {
            (Some(name), Some(map)) => map
                .get(&DictKey::Str(name.clone()))
                .cloned()
                .ok_or_else(|| RuntimeError::KeyError(super::values::quote_str(name)))?,
            (Some(_), None) => {
                return Err(RuntimeError::TypeError("format requires a mapping".into()))
            }
            (None, _) => positional.pop().ok_or_else(|| {
                RuntimeError::TypeError("not enough arguments for format string".into())
            })?,
        };
        let (align, rest) = match spec.strip_prefix('-') {
            Some(rest) => ("<", rest.to_string()),
            None => ("", spec.clone()),
        };
        let rendered = match conversion {
            's' => format_with_spec(&Value::Str(value.to_display_string()), &format!("{}{}", align, rest))?,
            'r' => format_with_spec(&Value::Str(value.repr()), &format!("{}{}", align, rest))?,
            'd' | 'i' | 'u' => {
                let int = match &value {
                    Value::Float(f) => Value::Int(f.trunc() as i64),
                    other => other.clone(),
                };
                format_with_spec(&int, &format!("{}{}d", align, rest))?
            }
            'f' | 'F' | 'e' | 'E' | 'x' | 'X' | 'o' | 'g' | 'G' => {
                format_with_spec(&value, &format!("{}{}{}", align, rest, conversion))?
            }
            other => {
                return Err(RuntimeError::ValueError(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        };
        out.push_str(&rendered);
    }
    if mapping.is_none() && !positional.is_empty() {
        return Err(RuntimeError::TypeError(
            "not all arguments converted during string formatting".into(),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_division_and_modulo_follow_floor_semantics() {
        assert!(matches!(binary(BinaryOp::FloorDiv, &Value::Int(-7), &Value::Int(2)), Ok(Value::Int(-4))));
        assert!(matches!(binary(BinaryOp::Mod, &Value::Int(-7), &Value::Int(2)), Ok(Value::Int(1))));
        assert!(matches!(binary(BinaryOp::FloorDiv, &Value::Int(7), &Value::Int(-2)), Ok(Value::Int(-4))));
        let err = binary(BinaryOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.exception_name(), "ZeroDivisionError");
    }

    #[test]
    fn test_string_concatenation_type_error() {
        let err = binary(BinaryOp::Add, &Value::str("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(err.message(), "can only concatenate str (not \"int\") to str");
    }

    #[test]
    fn test_huge_repetition_raises_instead_of_allocating() {
        let huge = Value::Int(i64::MAX);
        for sequence in [
            Value::str("ab"),
            Value::list(vec![Value::Int(1), Value::Int(2)]),
            Value::tuple(vec![Value::Int(1), Value::Int(2)]),
        ] {
            let err = binary(BinaryOp::Mul, &sequence, &huge).unwrap_err();
            assert_eq!(err.exception_name(), "OverflowError");
            let err = binary(BinaryOp::Mul, &Value::Int(1 << 30), &sequence).unwrap_err();
            assert_eq!(err.exception_name(), "MemoryError");
        }
        let err = binary(BinaryOp::Mul, &Value::str("x"), &Value::Int(i64::MAX)).unwrap_err();
        assert_eq!(err.exception_name(), "MemoryError");
        assert!(matches!(
            binary(BinaryOp::Mul, &Value::str(""), &huge),
            Ok(Value::Str(s)) if s.is_empty()
        ));
        assert!(matches!(
            binary(BinaryOp::Mul, &Value::str("ab"), &Value::Int(3)),
            Ok(Value::Str(s)) if s == "ababab"
        ));
    }

    #[test]
    fn test_wide_padding_rejected() {
        let err = format_with_spec(&Value::str("x"), ">999999999999").unwrap_err();
        assert_eq!(err.exception_name(), "MemoryError");
    }

    #[test]
    fn test_mixed_numeric_equality() {
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)));
        assert!(values_equal(&Value::Bool(true), &Value::Int(1)));
        assert!(!values_equal(&Value::str("1"), &Value::Int(1)));
    }

    #[test]
    fn test_slice_indices() {
        assert_eq!(slice_indices(5, Some(1), Some(3), None).unwrap(), vec![1, 2]);
        assert_eq!(slice_indices(5, None, None, Some(-1)).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert!(slice_indices(5, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_format_spec() {
        assert_eq!(format_with_spec(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_with_spec(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_with_spec(&Value::str("ab"), ">4").unwrap(), "  ab");
        assert_eq!(format_with_spec(&Value::Int(-5), "04").unwrap(), "-005");
        assert_eq!(format_with_spec(&Value::Float(0.25), ".0%").unwrap(), "25%");
        assert!(format_with_spec(&Value::str("x"), "d").is_err());
    }

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::str("gpt"), Value::Int(3)]);
        assert_eq!(percent_format("%s has %d", &args).unwrap(), "gpt has 3");
        assert_eq!(percent_format("%.1f%%", &Value::Float(12.5)).unwrap(), "12.5%");
        assert!(percent_format("%s %s", &Value::str("x")).is_err());
    }
}
