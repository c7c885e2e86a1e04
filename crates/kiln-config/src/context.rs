//! Expression evaluation context.
//!
//! Wraps the HCL evaluation context with the fixed catalog of pure functions
//! available to configuration expressions. Variables (`env`, `secrets`,
//! `jobs`) are bound by the decoding passes; the catalog never changes after
//! construction.

use hcl::eval::{Context, Evaluate};
use hcl::expr::Expression;
use hcl::Value;

/// The variable and function environment configuration expressions are
/// evaluated against. Owned by the [`Parser`](crate::Parser) for the
/// duration of a decode and discarded with it.
pub struct EvalContext {
  inner: Context<'static>,
}

impl EvalContext {
  pub fn new() -> Self {
    let mut inner = Context::new();
    funcs::install(&mut inner);
    Self { inner }
  }

  /// Install or replace a variable binding.
  pub fn bind(&mut self, name: &str, value: Value) {
    self.inner.declare_var(name, value);
  }

  /// Evaluate an expression against the current bindings.
  pub fn evaluate(&self, expr: &Expression) -> Result<Value, hcl::eval::Error> {
    expr.evaluate(&self.inner)
  }
}

impl Default for EvalContext {
  fn default() -> Self {
    Self::new()
  }
}

mod funcs {
  use chrono::{DateTime, Datelike, FixedOffset, Timelike};
  use hcl::eval::{Context, FuncArgs, FuncDef, ParamType};
  use hcl::{Map, Number, Value};

  /// Declare the full function catalog on a context.
  pub(super) fn install(ctx: &mut Context<'_>) {
    let unary_bool = || FuncDef::builder().param(ParamType::Bool);
    let binary_bool = || {
      FuncDef::builder()
        .param(ParamType::Bool)
        .param(ParamType::Bool)
    };
    let unary_num = || FuncDef::builder().param(ParamType::Number);
    let binary_num = || {
      FuncDef::builder()
        .param(ParamType::Number)
        .param(ParamType::Number)
    };
    let unary_str = || FuncDef::builder().param(ParamType::String);
    let binary_any = || FuncDef::builder().param(ParamType::Any).param(ParamType::Any);

    ctx.declare_func("not", unary_bool().build(not));
    ctx.declare_func("and", binary_bool().build(and));
    ctx.declare_func("or", binary_bool().build(or));

    ctx.declare_func("equal", binary_any().build(equal));
    ctx.declare_func("notEqual", binary_any().build(not_equal));

    ctx.declare_func("add", binary_num().build(add));
    ctx.declare_func("subtract", binary_num().build(subtract));
    ctx.declare_func("multiply", binary_num().build(multiply));
    ctx.declare_func("divide", binary_num().build(divide));
    ctx.declare_func("modulo", binary_num().build(modulo));
    ctx.declare_func("negate", unary_num().build(negate));
    ctx.declare_func("absolute", unary_num().build(absolute));
    ctx.declare_func("int", unary_num().build(int));

    ctx.declare_func("greaterThan", binary_num().build(greater_than));
    ctx.declare_func(
      "greaterThanOrEqualTo",
      binary_num().build(greater_than_or_equal_to),
    );
    ctx.declare_func("lessThan", binary_num().build(less_than));
    ctx.declare_func("lessThanOrEqualTo", binary_num().build(less_than_or_equal_to));

    ctx.declare_func(
      "min",
      FuncDef::builder().variadic_param(ParamType::Number).build(min),
    );
    ctx.declare_func(
      "max",
      FuncDef::builder().variadic_param(ParamType::Number).build(max),
    );

    ctx.declare_func("upper", unary_str().build(upper));
    ctx.declare_func("lower", unary_str().build(lower));
    ctx.declare_func("reverse", unary_str().build(reverse));
    ctx.declare_func("strlen", unary_str().build(strlen));
    ctx.declare_func(
      "substr",
      FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::Number)
        .param(ParamType::Number)
        .build(substr),
    );
    ctx.declare_func(
      "format",
      FuncDef::builder()
        .param(ParamType::String)
        .variadic_param(ParamType::Any)
        .build(format_fn),
    );
    ctx.declare_func(
      "formatList",
      FuncDef::builder()
        .param(ParamType::String)
        .variadic_param(ParamType::Any)
        .build(format_list),
    );
    ctx.declare_func(
      "formatDate",
      FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(format_date),
    );

    ctx.declare_func(
      "concat",
      FuncDef::builder().variadic_param(ParamType::Any).build(concat),
    );
    ctx.declare_func("length", FuncDef::builder().param(ParamType::Any).build(length));
    ctx.declare_func("index", binary_any().build(index));
    ctx.declare_func("hasIndex", binary_any().build(has_index));
    ctx.declare_func("hasElement", binary_any().build(has_element));
    ctx.declare_func(
      "union",
      FuncDef::builder().variadic_param(ParamType::Any).build(union),
    );
    ctx.declare_func(
      "intersection",
      FuncDef::builder()
        .variadic_param(ParamType::Any)
        .build(intersection),
    );
    ctx.declare_func("setSubtract", binary_any().build(set_subtract));
    ctx.declare_func("diff", binary_any().build(diff));

    ctx.declare_func(
      "jsonEncode",
      FuncDef::builder().param(ParamType::Any).build(json_encode),
    );
    ctx.declare_func("jsonDecode", unary_str().build(json_decode));
    ctx.declare_func("csvDecode", unary_str().build(csv_decode));

    ctx.declare_func(
      "coalesce",
      FuncDef::builder().variadic_param(ParamType::Any).build(coalesce),
    );

    ctx.declare_func("bytesLen", unary_str().build(bytes_len));
    ctx.declare_func(
      "bytesSlice",
      FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::Number)
        .param(ParamType::Number)
        .build(bytes_slice),
    );
  }

  fn bool_at(args: &FuncArgs, index: usize) -> Result<bool, String> {
    args[index]
      .as_bool()
      .ok_or_else(|| format!("argument {index} must be a bool"))
  }

  fn num_at(args: &FuncArgs, index: usize) -> Result<f64, String> {
    args[index]
      .as_f64()
      .ok_or_else(|| format!("argument {index} must be a number"))
  }

  fn str_at<'a>(args: &'a FuncArgs, index: usize) -> Result<&'a str, String> {
    args[index]
      .as_str()
      .ok_or_else(|| format!("argument {index} must be a string"))
  }

  fn array_at<'a>(args: &'a FuncArgs, index: usize) -> Result<&'a Vec<Value>, String> {
    args[index]
      .as_array()
      .ok_or_else(|| format!("argument {index} must be a list"))
  }

  fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
      Value::Number(Number::from(n as i64))
    } else {
      Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
  }

  fn not(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(!bool_at(&args, 0)?))
  }

  fn and(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(bool_at(&args, 0)? && bool_at(&args, 1)?))
  }

  fn or(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(bool_at(&args, 0)? || bool_at(&args, 1)?))
  }

  fn equal(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(args[0] == args[1]))
  }

  fn not_equal(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(args[0] != args[1]))
  }

  fn add(args: FuncArgs) -> Result<Value, String> {
    Ok(number(num_at(&args, 0)? + num_at(&args, 1)?))
  }

  fn subtract(args: FuncArgs) -> Result<Value, String> {
    Ok(number(num_at(&args, 0)? - num_at(&args, 1)?))
  }

  fn multiply(args: FuncArgs) -> Result<Value, String> {
    Ok(number(num_at(&args, 0)? * num_at(&args, 1)?))
  }

  fn divide(args: FuncArgs) -> Result<Value, String> {
    let divisor = num_at(&args, 1)?;
    if divisor == 0.0 {
      return Err("division by zero".to_string());
    }
    Ok(number(num_at(&args, 0)? / divisor))
  }

  fn modulo(args: FuncArgs) -> Result<Value, String> {
    let divisor = num_at(&args, 1)?;
    if divisor == 0.0 {
      return Err("modulo by zero".to_string());
    }
    Ok(number(num_at(&args, 0)? % divisor))
  }

  fn negate(args: FuncArgs) -> Result<Value, String> {
    Ok(number(-num_at(&args, 0)?))
  }

  fn absolute(args: FuncArgs) -> Result<Value, String> {
    Ok(number(num_at(&args, 0)?.abs()))
  }

  fn int(args: FuncArgs) -> Result<Value, String> {
    Ok(number(num_at(&args, 0)?.trunc()))
  }

  fn greater_than(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(num_at(&args, 0)? > num_at(&args, 1)?))
  }

  fn greater_than_or_equal_to(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(num_at(&args, 0)? >= num_at(&args, 1)?))
  }

  fn less_than(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(num_at(&args, 0)? < num_at(&args, 1)?))
  }

  fn less_than_or_equal_to(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(num_at(&args, 0)? <= num_at(&args, 1)?))
  }

  fn min(args: FuncArgs) -> Result<Value, String> {
    fold_numbers(&args, f64::min)
  }

  fn max(args: FuncArgs) -> Result<Value, String> {
    fold_numbers(&args, f64::max)
  }

  fn fold_numbers(args: &FuncArgs, pick: fn(f64, f64) -> f64) -> Result<Value, String> {
    if args.is_empty() {
      return Err("at least one argument is required".to_string());
    }
    let mut result = num_at(args, 0)?;
    for index in 1..args.len() {
      result = pick(result, num_at(args, index)?);
    }
    Ok(number(result))
  }

  fn upper(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(str_at(&args, 0)?.to_uppercase()))
  }

  fn lower(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(str_at(&args, 0)?.to_lowercase()))
  }

  fn reverse(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(
      str_at(&args, 0)?.chars().rev().collect::<String>(),
    ))
  }

  fn strlen(args: FuncArgs) -> Result<Value, String> {
    Ok(number(str_at(&args, 0)?.chars().count() as f64))
  }

  fn substr(args: FuncArgs) -> Result<Value, String> {
    let chars: Vec<char> = str_at(&args, 0)?.chars().collect();
    let offset = num_at(&args, 1)?.trunc() as i64;
    let length = num_at(&args, 2)?.trunc() as i64;

    let start = if offset < 0 {
      (chars.len() as i64 + offset).max(0) as usize
    } else {
      (offset as usize).min(chars.len())
    };
    let end = if length < 0 {
      chars.len()
    } else {
      (start + length as usize).min(chars.len())
    };

    Ok(Value::from(chars[start..end].iter().collect::<String>()))
  }

  fn format_fn(args: FuncArgs) -> Result<Value, String> {
    let rest: Vec<Value> = args.iter().skip(1).cloned().collect();
    let rendered = render(str_at(&args, 0)?, &rest)?;
    Ok(Value::from(rendered))
  }

  fn format_list(args: FuncArgs) -> Result<Value, String> {
    let spec = str_at(&args, 0)?;
    let rest: Vec<Value> = args.iter().skip(1).cloned().collect();

    let mut rows = 1;
    for value in &rest {
      if let Some(list) = value.as_array() {
        if list.len() > 1 {
          if rows > 1 && list.len() != rows {
            return Err(format!(
              "list arguments must share a length: found {} and {}",
              rows,
              list.len()
            ));
          }
          rows = list.len();
        }
      }
    }

    let mut out = Vec::with_capacity(rows);
    for row in 0..rows {
      let cells: Vec<Value> = rest
        .iter()
        .map(|value| match value.as_array() {
          Some(list) if list.len() == 1 => list[0].clone(),
          Some(list) => list[row].clone(),
          None => value.clone(),
        })
        .collect();
      out.push(Value::from(render(spec, &cells)?));
    }

    Ok(Value::Array(out))
  }

  /// printf-style rendering for `format`/`formatList`: `%s`, `%d`, `%f`,
  /// `%v` and `%%`.
  fn render(spec: &str, values: &[Value]) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = spec.chars();
    let mut remaining = values.iter();

    while let Some(c) = chars.next() {
      if c != '%' {
        out.push(c);
        continue;
      }
      let verb = chars.next();
      if verb == Some('%') {
        out.push('%');
        continue;
      }
      let value = remaining
        .next()
        .ok_or_else(|| format!("not enough arguments for format string '{spec}'"))?;
      match verb {
        Some('s') | Some('v') => out.push_str(&display(value)),
        Some('d') => {
          let n = value
            .as_f64()
            .ok_or_else(|| "'%d' requires a number".to_string())?;
          out.push_str(&(n.trunc() as i64).to_string());
        }
        Some('f') => {
          let n = value
            .as_f64()
            .ok_or_else(|| "'%f' requires a number".to_string())?;
          out.push_str(&format!("{n:.6}"));
        }
        Some(other) => return Err(format!("unsupported format verb '%{other}'")),
        None => return Err("dangling '%' at end of format string".to_string()),
      }
    }

    Ok(out)
  }

  fn display(value: &Value) -> String {
    match value {
      Value::String(s) => s.clone(),
      Value::Bool(b) => b.to_string(),
      Value::Number(n) => n.to_string(),
      Value::Null => "null".to_string(),
      other => serde_json::to_string(&to_json(other)).unwrap_or_default(),
    }
  }

  /// Render an RFC 3339 timestamp with `YYYY`/`YY`/`MM`/`DD`/`hh`/`mm`/`ss`
  /// tokens.
  fn format_date(args: FuncArgs) -> Result<Value, String> {
    let spec = str_at(&args, 0)?;
    let timestamp = str_at(&args, 1)?;
    let parsed: DateTime<FixedOffset> = DateTime::parse_from_rfc3339(timestamp)
      .map_err(|err| format!("invalid timestamp '{timestamp}': {err}"))?;

    let chars: Vec<char> = spec.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
      let c = chars[i];
      let mut run = 1;
      while i + run < chars.len() && chars[i + run] == c {
        run += 1;
      }
      match (c, run) {
        ('Y', 4) => out.push_str(&format!("{:04}", parsed.year())),
        ('Y', 2) => out.push_str(&format!("{:02}", parsed.year() % 100)),
        ('M', 2) => out.push_str(&format!("{:02}", parsed.month())),
        ('D', 2) => out.push_str(&format!("{:02}", parsed.day())),
        ('h', 2) => out.push_str(&format!("{:02}", parsed.hour())),
        ('m', 2) => out.push_str(&format!("{:02}", parsed.minute())),
        ('s', 2) => out.push_str(&format!("{:02}", parsed.second())),
        _ => {
          for _ in 0..run {
            out.push(c);
          }
        }
      }
      i += run;
    }

    Ok(Value::from(out))
  }

  fn concat(args: FuncArgs) -> Result<Value, String> {
    let mut out = Vec::new();
    for index in 0..args.len() {
      out.extend(array_at(&args, index)?.iter().cloned());
    }
    Ok(Value::Array(out))
  }

  fn length(args: FuncArgs) -> Result<Value, String> {
    let len = match &args[0] {
      Value::Array(items) => items.len(),
      Value::Object(entries) => entries.len(),
      Value::String(s) => s.chars().count(),
      other => return Err(format!("cannot take the length of {}", kind(other))),
    };
    Ok(number(len as f64))
  }

  fn lookup_index<'a>(collection: &'a Value, key: &Value) -> Result<Option<&'a Value>, String> {
    match collection {
      Value::Array(items) => {
        let index = key
          .as_f64()
          .ok_or_else(|| "list index must be a number".to_string())?;
        Ok(items.get(index.trunc() as usize))
      }
      Value::Object(entries) => {
        let key = key
          .as_str()
          .ok_or_else(|| "object index must be a string".to_string())?;
        Ok(entries.get(key))
      }
      other => Err(format!("cannot index {}", kind(other))),
    }
  }

  fn index(args: FuncArgs) -> Result<Value, String> {
    lookup_index(&args[0], &args[1])?
      .cloned()
      .ok_or_else(|| "index out of range".to_string())
  }

  fn has_index(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(lookup_index(&args[0], &args[1])?.is_some()))
  }

  fn has_element(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(array_at(&args, 0)?.contains(&args[1])))
  }

  fn push_unique(out: &mut Vec<Value>, value: &Value) {
    if !out.contains(value) {
      out.push(value.clone());
    }
  }

  fn union(args: FuncArgs) -> Result<Value, String> {
    let mut out = Vec::new();
    for index in 0..args.len() {
      for value in array_at(&args, index)? {
        push_unique(&mut out, value);
      }
    }
    Ok(Value::Array(out))
  }

  fn intersection(args: FuncArgs) -> Result<Value, String> {
    if args.is_empty() {
      return Ok(Value::Array(Vec::new()));
    }
    let mut out = Vec::new();
    'candidates: for value in array_at(&args, 0)? {
      for index in 1..args.len() {
        if !array_at(&args, index)?.contains(value) {
          continue 'candidates;
        }
      }
      push_unique(&mut out, value);
    }
    Ok(Value::Array(out))
  }

  fn set_subtract(args: FuncArgs) -> Result<Value, String> {
    let remove = array_at(&args, 1)?;
    let mut out = Vec::new();
    for value in array_at(&args, 0)? {
      if !remove.contains(value) {
        push_unique(&mut out, value);
      }
    }
    Ok(Value::Array(out))
  }

  fn diff(args: FuncArgs) -> Result<Value, String> {
    let left = array_at(&args, 0)?;
    let right = array_at(&args, 1)?;
    let mut out = Vec::new();
    for value in left {
      if !right.contains(value) {
        push_unique(&mut out, value);
      }
    }
    for value in right {
      if !left.contains(value) {
        push_unique(&mut out, value);
      }
    }
    Ok(Value::Array(out))
  }

  fn json_encode(args: FuncArgs) -> Result<Value, String> {
    serde_json::to_string(&to_json(&args[0]))
      .map(Value::from)
      .map_err(|err| err.to_string())
  }

  fn json_decode(args: FuncArgs) -> Result<Value, String> {
    let parsed: serde_json::Value =
      serde_json::from_str(str_at(&args, 0)?).map_err(|err| err.to_string())?;
    Ok(from_json(parsed))
  }

  fn csv_decode(args: FuncArgs) -> Result<Value, String> {
    let mut reader = csv::Reader::from_reader(str_at(&args, 0)?.as_bytes());
    let headers = reader.headers().map_err(|err| err.to_string())?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
      let record = record.map_err(|err| err.to_string())?;
      let mut row = Map::new();
      for (column, field) in record.iter().enumerate() {
        let key = headers
          .get(column)
          .map(str::to_string)
          .unwrap_or_else(|| column.to_string());
        row.insert(key, Value::from(field));
      }
      rows.push(Value::Object(row));
    }
    Ok(Value::Array(rows))
  }

  fn coalesce(args: FuncArgs) -> Result<Value, String> {
    args
      .iter()
      .find(|value| !value.is_null())
      .cloned()
      .ok_or_else(|| "no non-null argument".to_string())
  }

  fn bytes_len(args: FuncArgs) -> Result<Value, String> {
    Ok(number(str_at(&args, 0)?.len() as f64))
  }

  fn bytes_slice(args: FuncArgs) -> Result<Value, String> {
    let bytes = str_at(&args, 0)?.as_bytes();
    let begin = (num_at(&args, 1)?.trunc() as i64).clamp(0, bytes.len() as i64) as usize;
    let end = (num_at(&args, 2)?.trunc() as i64).clamp(begin as i64, bytes.len() as i64) as usize;
    Ok(Value::from(
      String::from_utf8_lossy(&bytes[begin..end]).into_owned(),
    ))
  }

  fn kind(value: &Value) -> &'static str {
    match value {
      Value::Null => "null",
      Value::Bool(_) => "a bool",
      Value::Number(_) => "a number",
      Value::String(_) => "a string",
      Value::Array(_) => "a list",
      Value::Object(_) => "an object",
    }
  }

  pub(super) fn to_json(value: &Value) -> serde_json::Value {
    match value {
      Value::Null => serde_json::Value::Null,
      Value::Bool(b) => serde_json::Value::Bool(*b),
      Value::Number(n) => n
        .as_i64()
        .map(serde_json::Value::from)
        .or_else(|| n.as_f64().map(serde_json::Value::from))
        .unwrap_or(serde_json::Value::Null),
      Value::String(s) => serde_json::Value::String(s.clone()),
      Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
      Value::Object(entries) => serde_json::Value::Object(
        entries
          .iter()
          .map(|(key, value)| (key.clone(), to_json(value)))
          .collect(),
      ),
    }
  }

  pub(super) fn from_json(value: serde_json::Value) -> Value {
    match value {
      serde_json::Value::Null => Value::Null,
      serde_json::Value::Bool(b) => Value::Bool(b),
      serde_json::Value::Number(n) => n
        .as_i64()
        .map(|i| Value::Number(Number::from(i)))
        .or_else(|| n.as_f64().and_then(Number::from_f64).map(Value::Number))
        .unwrap_or(Value::Null),
      serde_json::Value::String(s) => Value::String(s),
      serde_json::Value::Array(items) => {
        Value::Array(items.into_iter().map(from_json).collect())
      }
      serde_json::Value::Object(entries) => Value::Object(
        entries
          .into_iter()
          .map(|(key, value)| (key, from_json(value)))
          .collect(),
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use hcl::Value;

  /// Evaluate a single expression by parsing it as an attribute value.
  fn eval(ctx: &EvalContext, source: &str) -> Result<Value, String> {
    let body = hcl::parse(&format!("x = {source}\n")).map_err(|err| err.to_string())?;
    let attr = body.attributes().next().expect("one attribute");
    ctx.evaluate(&attr.expr).map_err(|err| err.to_string())
  }

  fn eval_ok(ctx: &EvalContext, source: &str) -> Value {
    eval(ctx, source).unwrap_or_else(|err| panic!("{source}: {err}"))
  }

  #[test]
  fn test_logical_and_equality() {
    let ctx = EvalContext::new();
    assert_eq!(eval_ok(&ctx, r#"not(false)"#), Value::from(true));
    assert_eq!(eval_ok(&ctx, r#"and(true, false)"#), Value::from(false));
    assert_eq!(eval_ok(&ctx, r#"or(true, false)"#), Value::from(true));
    assert_eq!(eval_ok(&ctx, r#"equal("a", "a")"#), Value::from(true));
    assert_eq!(eval_ok(&ctx, r#"notEqual(1, 2)"#), Value::from(true));
  }

  #[test]
  fn test_arithmetic() {
    let ctx = EvalContext::new();
    assert_eq!(eval_ok(&ctx, "add(2, 3)"), Value::from(5));
    assert_eq!(eval_ok(&ctx, "subtract(2, 3)"), Value::from(-1));
    assert_eq!(eval_ok(&ctx, "multiply(4, 3)"), Value::from(12));
    assert_eq!(eval_ok(&ctx, "divide(9, 3)"), Value::from(3));
    assert_eq!(eval_ok(&ctx, "modulo(9, 4)"), Value::from(1));
    assert_eq!(eval_ok(&ctx, "negate(5)"), Value::from(-5));
    assert_eq!(eval_ok(&ctx, "absolute(negate(5))"), Value::from(5));
    assert_eq!(eval_ok(&ctx, "int(divide(7, 2))"), Value::from(3));
    assert!(eval(&ctx, "divide(1, 0)").is_err());
  }

  #[test]
  fn test_comparison_and_minmax() {
    let ctx = EvalContext::new();
    assert_eq!(eval_ok(&ctx, "greaterThan(2, 1)"), Value::from(true));
    assert_eq!(eval_ok(&ctx, "lessThanOrEqualTo(2, 2)"), Value::from(true));
    assert_eq!(eval_ok(&ctx, "min(3, 1, 2)"), Value::from(1));
    assert_eq!(eval_ok(&ctx, "max(3, 1, 2)"), Value::from(3));
  }

  #[test]
  fn test_string_functions() {
    let ctx = EvalContext::new();
    assert_eq!(eval_ok(&ctx, r#"upper("abc")"#), Value::from("ABC"));
    assert_eq!(eval_ok(&ctx, r#"lower("ABC")"#), Value::from("abc"));
    assert_eq!(eval_ok(&ctx, r#"reverse("abc")"#), Value::from("cba"));
    assert_eq!(eval_ok(&ctx, r#"strlen("abcd")"#), Value::from(4));
    assert_eq!(eval_ok(&ctx, r#"substr("abcdef", 1, 3)"#), Value::from("bcd"));
    assert_eq!(eval_ok(&ctx, r#"substr("abcdef", -2, -1)"#), Value::from("ef"));
  }

  #[test]
  fn test_format() {
    let ctx = EvalContext::new();
    assert_eq!(
      eval_ok(&ctx, r#"format("%s-%d", "v", 3)"#),
      Value::from("v-3")
    );
    assert_eq!(eval_ok(&ctx, r#"format("100%%")"#), Value::from("100%"));
    assert!(eval(&ctx, r#"format("%s")"#).is_err());
  }

  #[test]
  fn test_format_list_broadcasts_scalars() {
    let ctx = EvalContext::new();
    assert_eq!(
      eval_ok(&ctx, r#"formatList("%s=%s", "host", ["a", "b"])"#),
      Value::from(vec![Value::from("host=a"), Value::from("host=b")])
    );
  }

  #[test]
  fn test_format_date() {
    let ctx = EvalContext::new();
    assert_eq!(
      eval_ok(&ctx, r#"formatDate("YYYY-MM-DD hh:mm:ss", "2021-03-02T08:09:10Z")"#),
      Value::from("2021-03-02 08:09:10")
    );
  }

  #[test]
  fn test_collection_functions() {
    let ctx = EvalContext::new();
    assert_eq!(
      eval_ok(&ctx, r#"concat(["a"], ["b"])"#),
      Value::from(vec![Value::from("a"), Value::from("b")])
    );
    assert_eq!(eval_ok(&ctx, r#"length(["a", "b"])"#), Value::from(2));
    assert_eq!(eval_ok(&ctx, r#"length("abc")"#), Value::from(3));
    assert_eq!(eval_ok(&ctx, r#"index(["a", "b"], 1)"#), Value::from("b"));
    assert_eq!(eval_ok(&ctx, r#"hasIndex(["a"], 4)"#), Value::from(false));
    assert_eq!(eval_ok(&ctx, r#"hasElement(["a"], "a")"#), Value::from(true));
  }

  #[test]
  fn test_set_operations() {
    let ctx = EvalContext::new();
    assert_eq!(
      eval_ok(&ctx, r#"union(["a", "b"], ["b", "c"])"#),
      Value::from(vec![Value::from("a"), Value::from("b"), Value::from("c")])
    );
    assert_eq!(
      eval_ok(&ctx, r#"intersection(["a", "b"], ["b", "c"])"#),
      Value::from(vec![Value::from("b")])
    );
    assert_eq!(
      eval_ok(&ctx, r#"setSubtract(["a", "b"], ["b"])"#),
      Value::from(vec![Value::from("a")])
    );
    assert_eq!(
      eval_ok(&ctx, r#"diff(["a", "b"], ["b", "c"])"#),
      Value::from(vec![Value::from("a"), Value::from("c")])
    );
  }

  #[test]
  fn test_json_roundtrip() {
    let ctx = EvalContext::new();
    assert_eq!(
      eval_ok(&ctx, r#"jsonEncode({"a" = 1})"#),
      Value::from(r#"{"a":1}"#)
    );
    assert_eq!(
      eval_ok(&ctx, r#"jsonDecode("[1, 2]")"#),
      Value::from(vec![Value::from(1), Value::from(2)])
    );
  }

  #[test]
  fn test_csv_decode() {
    let ctx = EvalContext::new();
    let result = eval_ok(&ctx, "csvDecode(\"name,port\\napi,8080\\n\")");
    let rows = result.as_array().expect("list of rows");
    assert_eq!(rows.len(), 1);
    let row = rows[0].as_object().expect("row object");
    assert_eq!(row["name"], Value::from("api"));
    assert_eq!(row["port"], Value::from("8080"));
  }

  #[test]
  fn test_coalesce() {
    let ctx = EvalContext::new();
    assert_eq!(eval_ok(&ctx, r#"coalesce(null, "x")"#), Value::from("x"));
    assert!(eval(&ctx, "coalesce(null, null)").is_err());
  }

  #[test]
  fn test_bytes_functions() {
    let ctx = EvalContext::new();
    assert_eq!(eval_ok(&ctx, r#"bytesLen("abc")"#), Value::from(3));
    assert_eq!(eval_ok(&ctx, r#"bytesSlice("abcdef", 1, 3)"#), Value::from("bc"));
  }

  #[test]
  fn test_unknown_symbols_are_diagnostics() {
    let ctx = EvalContext::new();
    assert!(eval(&ctx, "noSuchFunction(1)").is_err());
    assert!(eval(&ctx, "no_such_variable").is_err());
  }

  #[test]
  fn test_bound_variables_resolve() {
    let mut ctx = EvalContext::new();
    let mut env = hcl::Map::new();
    env.insert("NAME".to_string(), Value::from("kiln"));
    ctx.bind("env", Value::Object(env));

    assert_eq!(eval_ok(&ctx, "env.NAME"), Value::from("kiln"));
    assert_eq!(eval_ok(&ctx, r#""${upper(env.NAME)}""#), Value::from("KILN"));
  }
}
