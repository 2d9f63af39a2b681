//! Pure built-in functions available to contract code
//!
//! Builtins never touch the ledger and never observe anything outside their
//! arguments. Errors are plain messages; the interpreter turns them into
//! thrown contract errors.

use std::collections::BTreeMap;

use crate::value::Value;

/// Largest float magnitude converted back to an integer result
const MAX_SAFE_FLOAT: f64 = 9.0e15;

type Builtin = fn(&[Value]) -> Result<Value, String>;

/// `(name, min args, max args (None = variadic), implementation)`
const BUILTINS: &[(&str, usize, Option<usize>, Builtin)] = &[
    ("len", 1, Some(1), len),
    ("floor", 1, Some(1), floor),
    ("ceil", 1, Some(1), ceil),
    ("round", 1, Some(2), round),
    ("abs", 1, Some(1), abs),
    ("min", 1, None, min),
    ("max", 1, None, max),
    ("str", 1, Some(1), str),
    ("num", 1, Some(1), num),
    ("int", 1, Some(1), int),
    ("isInteger", 1, Some(1), is_integer),
    ("isNumber", 1, Some(1), is_number),
    ("isString", 1, Some(1), is_string),
    ("isArray", 1, Some(1), is_array),
    ("isObject", 1, Some(1), is_object),
    ("keys", 1, Some(1), keys),
    ("values", 1, Some(1), values),
    ("push", 2, Some(2), push),
    ("concat", 2, None, concat),
    ("contains", 2, Some(2), contains),
    ("slice", 2, Some(3), slice),
    ("typeOf", 1, Some(1), type_of),
];

pub fn arity(name: &str) -> Option<(usize, Option<usize>)> {
    BUILTINS
        .iter()
        .find(|(n, ..)| *n == name)
        .map(|(_, min, max, _)| (*min, *max))
}

pub fn call(name: &str, args: &[Value]) -> Result<Value, String> {
    let (_, min, max, f) = BUILTINS
        .iter()
        .find(|(n, ..)| *n == name)
        .ok_or_else(|| format!("unknown function '{}'", name))?;
    if args.len() < *min || max.is_some_and(|m| args.len() > m) {
        return Err(format!("{}() called with {} argument(s)", name, args.len()));
    }
    f(args)
}

/// Text form used by `str()` and string concatenation: strings unquoted,
/// containers as canonical JSON
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_canonical_json(),
    }
}

/// Integer result when the float is integral and in range
pub fn normalize_float(f: f64) -> Result<Value, String> {
    if !f.is_finite() {
        return Err("numeric overflow".to_string());
    }
    if f.fract() == 0.0 && f.abs() < MAX_SAFE_FLOAT {
        Ok(Value::Integer(f as i64))
    } else {
        Ok(Value::Float(f))
    }
}

fn number(value: &Value, func: &str) -> Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("{}() expects a number, got {}", func, value.type_name()))
}

fn len(args: &[Value]) -> Result<Value, String> {
    let n = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(m) => m.len(),
        other => return Err(format!("len() expects a string, array or object, got {}", other.type_name())),
    };
    Ok(Value::from(n as u64))
}

fn floor(args: &[Value]) -> Result<Value, String> {
    match &args[0] {
        Value::Integer(i) => Ok(Value::Integer(*i)),
        v => normalize_float(number(v, "floor")?.floor()),
    }
}

fn ceil(args: &[Value]) -> Result<Value, String> {
    match &args[0] {
        Value::Integer(i) => Ok(Value::Integer(*i)),
        v => normalize_float(number(v, "ceil")?.ceil()),
    }
}

fn round(args: &[Value]) -> Result<Value, String> {
    let x = number(&args[0], "round")?;
    match args.get(1) {
        None => match &args[0] {
            Value::Integer(i) => Ok(Value::Integer(*i)),
            _ => normalize_float(x.round()),
        },
        Some(d) => {
            let decimals = d
                .as_i64()
                .filter(|d| (0..=15).contains(d))
                .ok_or_else(|| "round() decimals must be an integer between 0 and 15".to_string())?;
            let factor = 10f64.powi(decimals as i32);
            let rounded = (x * factor).round() / factor;
            if !rounded.is_finite() {
                return Err("numeric overflow".to_string());
            }
            Ok(Value::Float(rounded))
        }
    }
}

fn abs(args: &[Value]) -> Result<Value, String> {
    match &args[0] {
        Value::Integer(i) => i
            .checked_abs()
            .map(Value::Integer)
            .ok_or_else(|| "numeric overflow".to_string()),
        v => Ok(Value::Float(number(v, "abs")?.abs())),
    }
}

fn extreme(args: &[Value], func: &str, pick_greater: bool) -> Result<Value, String> {
    let items: &[Value] = match args {
        [Value::Array(items)] => items,
        _ => args,
    };
    let mut best: Option<&Value> = None;
    for item in items {
        number(item, func)?;
        best = match best {
            None => Some(item),
            Some(current) => {
                let ord = item.compare(current);
                let better = if pick_greater {
                    ord == std::cmp::Ordering::Greater
                } else {
                    ord == std::cmp::Ordering::Less
                };
                Some(if better { item } else { current })
            }
        };
    }
    best.cloned()
        .ok_or_else(|| format!("{}() of an empty array", func))
}

fn min(args: &[Value]) -> Result<Value, String> {
    extreme(args, "min", false)
}

fn max(args: &[Value]) -> Result<Value, String> {
    extreme(args, "max", true)
}

fn str(args: &[Value]) -> Result<Value, String> {
    Ok(Value::String(to_text(&args[0])))
}

fn num(args: &[Value]) -> Result<Value, String> {
    match &args[0] {
        v @ (Value::Integer(_) | Value::Float(_)) => Ok(v.clone()),
        Value::String(s) => {
            let text = s.trim();
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Value::Integer(i));
            }
            match text.parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(Value::Float(f)),
                _ => Err(format!("num() cannot convert '{}'", s)),
            }
        }
        other => Err(format!("num() expects a string or number, got {}", other.type_name())),
    }
}

fn int(args: &[Value]) -> Result<Value, String> {
    let f = match &args[0] {
        Value::Integer(i) => return Ok(Value::Integer(*i)),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(i) => return Ok(Value::Integer(i)),
            Err(_) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("int() cannot convert '{}'", s))?,
        },
        v => number(v, "int")?,
    };
    let truncated = f.trunc();
    if !truncated.is_finite() || truncated.abs() >= MAX_SAFE_FLOAT {
        return Err("int() argument out of range".to_string());
    }
    Ok(Value::Integer(truncated as i64))
}

fn is_integer(args: &[Value]) -> Result<Value, String> {
    let result = match &args[0] {
        Value::Integer(_) => true,
        Value::Float(f) => f.fract() == 0.0,
        _ => false,
    };
    Ok(Value::Boolean(result))
}

fn is_number(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Boolean(matches!(args[0], Value::Integer(_) | Value::Float(_))))
}

fn is_string(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Boolean(matches!(args[0], Value::String(_))))
}

fn is_array(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Boolean(matches!(args[0], Value::Array(_))))
}

fn is_object(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Boolean(matches!(args[0], Value::Object(_))))
}

fn object_arg<'a>(value: &'a Value, func: &str) -> Result<&'a BTreeMap<String, Value>, String> {
    value
        .as_object()
        .ok_or_else(|| format!("{}() expects an object, got {}", func, value.type_name()))
}

fn keys(args: &[Value]) -> Result<Value, String> {
    let map = object_arg(&args[0], "keys")?;
    Ok(Value::Array(map.keys().map(|k| Value::from(k.as_str())).collect()))
}

fn values(args: &[Value]) -> Result<Value, String> {
    let map = object_arg(&args[0], "values")?;
    Ok(Value::Array(map.values().cloned().collect()))
}

fn push(args: &[Value]) -> Result<Value, String> {
    match &args[0] {
        Value::Array(items) => {
            let mut items = items.clone();
            items.push(args[1].clone());
            Ok(Value::Array(items))
        }
        other => Err(format!("push() expects an array, got {}", other.type_name())),
    }
}

fn concat(args: &[Value]) -> Result<Value, String> {
    if args.iter().all(|a| matches!(a, Value::Array(_))) {
        let items = args
            .iter()
            .filter_map(Value::as_array)
            .flat_map(|a| a.iter().cloned())
            .collect();
        Ok(Value::Array(items))
    } else if args.iter().all(|a| matches!(a, Value::String(_))) {
        Ok(Value::String(args.iter().filter_map(Value::as_str).collect()))
    } else {
        Err("concat() expects all arrays or all strings".to_string())
    }
}

fn contains(args: &[Value]) -> Result<Value, String> {
    let found = match (&args[0], &args[1]) {
        (Value::Array(items), needle) => items.iter().any(|i| i.loose_eq(needle)),
        (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        (container, needle) => {
            return Err(format!(
                "contains() cannot search {} for {}",
                container.type_name(),
                needle.type_name()
            ))
        }
    };
    Ok(Value::Boolean(found))
}

/// Resolve a possibly negative index against `len`, clamped to `0..=len`
fn resolve_index(index: &Value, len: usize) -> Result<usize, String> {
    let i = index
        .as_i64()
        .ok_or_else(|| "slice() indexes must be integers".to_string())?;
    let len = len as i64;
    let resolved = if i < 0 { (len + i).max(0) } else { i.min(len) };
    Ok(resolved as usize)
}

fn slice(args: &[Value]) -> Result<Value, String> {
    let len = match &args[0] {
        Value::Array(items) => items.len(),
        Value::String(s) => s.chars().count(),
        other => return Err(format!("slice() expects an array or string, got {}", other.type_name())),
    };
    let start = resolve_index(&args[1], len)?;
    let end = match args.get(2) {
        Some(e) => resolve_index(e, len)?,
        None => len,
    };
    let end = end.max(start);

    match &args[0] {
        Value::Array(items) => Ok(Value::Array(items[start..end].to_vec())),
        Value::String(s) => Ok(Value::String(s.chars().skip(start).take(end - start).collect())),
        _ => Err("slice() expects an array or string".to_string()),
    }
}

fn type_of(args: &[Value]) -> Result<Value, String> {
    Ok(Value::from(args[0].type_name()))
}
