use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::interpreter::Interpreter;
use crate::runtime::scope::ScopeRef;
use crate::runtime::value::{
    ClosureValue, DictKey, DictValue, ListValue, NativeFn, ProcValue, Value,
};
use rand::Rng;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

/// The built-in procedure table. Parsing binds these eagerly, so the table
/// is built once per interpreter and consulted by name at parse time.
pub fn procedures() -> HashMap<String, ProcValue> {
    let mut table = HashMap::new();
    let mut def = |name: &'static str, arity: usize, code: NativeFn| {
        table.insert(name.to_string(), ProcValue { name, arity, code });
    };

    // Essentials: code as data.
    def("parse", 1, |interp, _, args| {
        let words = want_words(&pop1(args))?;
        let tokens = interp.parse_words(words.iter().map(String::as_str))?;
        Ok(Value::List(ListValue::from_vec(tokens)))
    });
    def("run", 1, |interp, scope, args| {
        let code = want_code(&pop1(args))?;
        interp.run(&code, scope)
    });
    def("results", 1, |interp, scope, args| {
        let code = want_code(&pop1(args))?;
        let values = interp.results(&code, scope)?;
        Ok(Value::List(ListValue::from_vec(values)))
    });
    def("load", 1, |interp, scope, args| {
        let path = want_str(pop1(args))?;
        interp.load(&path, scope)
    });
    def("ignore", 1, |_, _, _| Ok(Value::Nil));

    // Error handling.
    def("throw", 1, |_, _, args| {
        Err(RuntimeError::UserThrown {
            message: pop1(args).to_string(),
        })
    });
    def("catch", 2, builtin_catch);

    // Flow control signals.
    def("break", 0, |_, scope, _| {
        scope.set_breaking(true);
        Ok(Value::Nil)
    });
    def("continue", 0, |_, scope, _| {
        scope.set_continuing(true);
        Ok(Value::Nil)
    });
    def("return", 1, |_, scope, args| {
        scope.set_returning(true);
        Ok(pop1(args))
    });

    // Printing.
    def("print", 1, |interp, _, args| {
        match pop1(args) {
            Value::List(list) => writeln!(interp.output, "{}", list.join_spaces())?,
            other => writeln!(interp.output, "{other}")?,
        }
        Ok(Value::Nil)
    });
    def("show", 1, |interp, _, args| {
        writeln!(interp.output, "{}", pop1(args))?;
        Ok(Value::Nil)
    });
    def("type", 1, |interp, _, args| {
        match pop1(args) {
            Value::List(list) => write!(interp.output, "{}", list.join_spaces())?,
            other => write!(interp.output, "{other}")?,
        }
        interp.output.flush()?;
        Ok(Value::Nil)
    });

    // Reading: one line per call, never buffering ahead.
    def("readword", 0, |interp, _, _| {
        Ok(match interp.read_line()? {
            Some(line) => Value::Str(line),
            None => Value::Nil,
        })
    });
    def("readlist", 0, |interp, _, _| {
        let words = match interp.read_line()? {
            Some(line) => line
                .split_whitespace()
                .map(|word| Value::Str(word.to_string()))
                .collect(),
            None => Vec::new(),
        };
        Ok(Value::List(ListValue::from_vec(words)))
    });

    // Creating variables.
    def("make", 2, |_, scope, args| {
        let (name, value) = pop2(args);
        scope.put(&want_str(name)?.to_lowercase(), value);
        Ok(Value::Nil)
    });
    def("local", 1, |_, scope, args| {
        match pop1(args) {
            Value::List(names) => {
                for name in names.to_vec() {
                    scope.define(&want_str(name)?.to_lowercase(), Value::Nil);
                }
            }
            name => scope.define(&want_str(name)?.to_lowercase(), Value::Nil),
        }
        Ok(Value::Nil)
    });
    def("localmake", 2, |_, scope, args| {
        let (name, value) = pop2(args);
        scope.define(&want_str(name)?.to_lowercase(), value);
        Ok(Value::Nil)
    });
    def("thing", 1, |_, scope, args| {
        scope.lookup(&want_str(pop1(args))?.to_lowercase())
    });

    // Conditionals.
    def("if", 2, |interp, scope, args| {
        let (cond, code) = pop2(args);
        if cond.truthy()? {
            interp.run(&want_code(&code)?, scope)
        } else {
            Ok(Value::Nil)
        }
    });
    def("ifelse", 3, builtin_ifelse);
    def("test", 1, |_, scope, args| {
        let cond = pop1(args).truthy()?;
        scope.set_test(cond);
        Ok(Value::Nil)
    });
    def("iftrue", 1, |interp, scope, args| {
        match scope.test() {
            None => Err(RuntimeError::TestNotSet),
            Some(true) => interp.run(&want_code(&pop1(args))?, scope),
            Some(false) => Ok(Value::Nil),
        }
    });
    def("iffalse", 1, |interp, scope, args| {
        match scope.test() {
            None => Err(RuntimeError::TestNotSet),
            Some(false) => interp.run(&want_code(&pop1(args))?, scope),
            Some(true) => Ok(Value::Nil),
        }
    });

    // Loops.
    def("while", 2, builtin_while);
    def("for", 5, builtin_for);
    def("foreach", 3, builtin_foreach);

    // Functions.
    def("fn", 2, |_, scope, args| {
        let (params, body) = pop2(args);
        Ok(Value::Closure(make_closure(&params, &body, scope)?))
    });
    def("function", 3, |_, scope, args| {
        let (name, params, body) = pop3(args);
        let closure = make_closure(&params, &body, scope)?;
        scope.define(&want_str(name)?.to_lowercase(), Value::Closure(closure));
        Ok(Value::Nil)
    });
    def("apply", 2, |interp, scope, args| {
        let (callee, arglist) = pop2(args);
        call_function(interp, scope, &callee, want_list(&arglist)?.to_vec())
    });
    def("map", 2, |interp, scope, args| {
        let (callee, items) = pop2(args);
        let mut mapped = Vec::new();
        for item in seq_elements(&items)? {
            mapped.push(call_function(interp, scope, &callee, vec![item])?);
        }
        Ok(Value::List(ListValue::from_vec(mapped)))
    });
    def("filter", 2, |interp, scope, args| {
        let (callee, items) = pop2(args);
        let mut kept = Vec::new();
        for item in seq_elements(&items)? {
            if call_function(interp, scope, &callee, vec![item.clone()])?.truthy()? {
                kept.push(item);
            }
        }
        Ok(Value::List(ListValue::from_vec(kept)))
    });
    def("arity", 1, |_, _, args| {
        match pop1(args) {
            Value::Closure(closure) => Ok(Value::Int(closure.params.len() as i64)),
            Value::Proc(proc) => Ok(Value::Int(proc.arity as i64)),
            other => Err(mismatch("a function", &other)),
        }
    });

    // Arithmetic: Int stays Int, mixing with Float floats, anything else
    // is quietly NaN.
    def("add", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(numeric(a, b, i64::wrapping_add, |x, y| x + y))
    });
    def("sub", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(numeric(a, b, i64::wrapping_sub, |x, y| x - y))
    });
    def("mul", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(numeric(a, b, i64::wrapping_mul, |x, y| x * y))
    });
    def("div", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(Value::Float(want_float(&a)? / want_float(&b)?))
    });
    def("mod", 2, |_, _, args| {
        let (a, b) = pop2(args);
        let (a, b) = (want_int(&a)?, want_int(&b)?);
        if b == 0 {
            return Err(RuntimeError::TypeMismatch {
                message: "modulo by zero".to_string(),
            });
        }
        // Floored modulo: the result takes the sign of the divisor.
        Ok(Value::Int(a.wrapping_rem(b).wrapping_add(b).wrapping_rem(b)))
    });
    def("pow", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(Value::Float(want_float(&a)?.powf(want_float(&b)?)))
    });
    def("minus", 1, |_, _, args| {
        match pop1(args) {
            Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
            Value::Float(x) => Ok(Value::Float(-x)),
            other => Err(mismatch("a number", &other)),
        }
    });
    def("abs", 1, |_, _, args| {
        match pop1(args) {
            Value::Int(i) => Ok(Value::Int(i.wrapping_abs())),
            Value::Float(x) => Ok(Value::Float(x.abs())),
            other => Err(mismatch("a number", &other)),
        }
    });
    def("int", 1, |_, _, args| {
        match pop1(args) {
            Value::Int(i) => Ok(Value::Int(i)),
            Value::Float(x) => Ok(Value::Int(x.trunc() as i64)),
            other => Err(mismatch("a number", &other)),
        }
    });

    def("pi", 0, |_, _, _| Ok(Value::Float(std::f64::consts::PI)));
    def("sqrt", 1, |_, _, args| {
        Ok(Value::Float(want_float(&pop1(args))?.sqrt()))
    });
    def("sin", 1, |_, _, args| {
        Ok(Value::Float(want_float(&pop1(args))?.sin()))
    });
    def("cos", 1, |_, _, args| {
        Ok(Value::Float(want_float(&pop1(args))?.cos()))
    });
    def("rad", 1, |_, _, args| {
        Ok(Value::Float(want_float(&pop1(args))?.to_radians()))
    });
    def("deg", 1, |_, _, args| {
        Ok(Value::Float(want_float(&pop1(args))?.to_degrees()))
    });
    def("hypot", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(Value::Float(want_float(&a)?.hypot(want_float(&b)?)))
    });

    def("min", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(if a.try_cmp(&b)? == Ordering::Greater { b } else { a })
    });
    def("max", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(if a.try_cmp(&b)? == Ordering::Less { b } else { a })
    });

    // Comparison and logic.
    def("lt", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(Value::Bool(a.try_cmp(&b)? == Ordering::Less))
    });
    def("lte", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(Value::Bool(a.try_cmp(&b)? != Ordering::Greater))
    });
    def("gt", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(Value::Bool(a.try_cmp(&b)? == Ordering::Greater))
    });
    def("gte", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(Value::Bool(a.try_cmp(&b)? != Ordering::Less))
    });
    def("eq", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(Value::Bool(a.try_eq(&b)?))
    });
    def("neq", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(Value::Bool(!a.try_eq(&b)?))
    });
    def("and", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(Value::Bool(a.truthy()? && b.truthy()?))
    });
    def("or", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(Value::Bool(a.truthy()? || b.truthy()?))
    });
    def("not", 1, |_, _, args| Ok(Value::Bool(!pop1(args).truthy()?)));

    // Sequences: words and lists alike, preserving the kind they came in.
    def("first", 1, |_, _, args| {
        match pop1(args) {
            Value::List(list) => list.get(0).ok_or_else(|| empty_seq("first")),
            Value::Str(s) => s
                .chars()
                .next()
                .map(|c| Value::Str(c.to_string()))
                .ok_or_else(|| empty_seq("first")),
            other => Err(mismatch("a list or word", &other)),
        }
    });
    def("last", 1, |_, _, args| {
        match pop1(args) {
            Value::List(list) => {
                let items = list.to_vec();
                items.last().cloned().ok_or_else(|| empty_seq("last"))
            }
            Value::Str(s) => s
                .chars()
                .last()
                .map(|c| Value::Str(c.to_string()))
                .ok_or_else(|| empty_seq("last")),
            other => Err(mismatch("a list or word", &other)),
        }
    });
    def("butfirst", 1, |_, _, args| {
        match pop1(args) {
            Value::List(list) => {
                let items = list.to_vec();
                let rest = items.get(1..).unwrap_or_default().to_vec();
                Ok(Value::List(ListValue::from_vec(rest)))
            }
            Value::Str(s) => {
                let mut chars = s.chars();
                chars.next();
                Ok(Value::Str(chars.as_str().to_string()))
            }
            other => Err(mismatch("a list or word", &other)),
        }
    });
    def("butlast", 1, |_, _, args| {
        match pop1(args) {
            Value::List(list) => {
                let mut items = list.to_vec();
                items.pop();
                Ok(Value::List(ListValue::from_vec(items)))
            }
            Value::Str(s) => {
                let mut chars: Vec<char> = s.chars().collect();
                chars.pop();
                Ok(Value::Str(chars.into_iter().collect()))
            }
            other => Err(mismatch("a list or word", &other)),
        }
    });
    def("count", 1, |_, _, args| {
        match pop1(args) {
            Value::List(list) => Ok(Value::Int(list.len() as i64)),
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::Dict(dict) => Ok(Value::Int(dict.len() as i64)),
            other => Err(mismatch("a list, word or dict", &other)),
        }
    });
    def("sorted", 1, |_, _, args| {
        let mut items = seq_elements(&pop1(args))?;
        let mut failure = None;
        items.sort_by(|a, b| match a.try_cmp(b) {
            Ok(ord) => ord,
            Err(err) => {
                failure.get_or_insert(err);
                Ordering::Equal
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(Value::List(ListValue::from_vec(items))),
        }
    });
    def("pick", 1, |interp, _, args| {
        let items = seq_elements(&pop1(args))?;
        if items.is_empty() {
            return Err(empty_seq("pick"));
        }
        let index = interp.rng.gen_range(0..items.len());
        Ok(items[index].clone())
    });
    def("copy", 1, |_, _, args| {
        match pop1(args) {
            Value::List(list) => Ok(Value::List(ListValue::from_vec(list.to_vec()))),
            Value::Dict(dict) => {
                let duplicate = DictValue::new();
                for (key, value) in dict.entries.borrow().iter() {
                    duplicate.insert(key.clone(), value.clone());
                }
                Ok(Value::Dict(duplicate))
            }
            other => Ok(other),
        }
    });
    def("list", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(Value::List(ListValue::from_vec(vec![a, b])))
    });
    def("fput", 2, |_, _, args| {
        let (item, list) = pop2(args);
        let mut items = vec![item];
        items.extend(want_list(&list)?.to_vec());
        Ok(Value::List(ListValue::from_vec(items)))
    });
    def("lput", 2, |_, _, args| {
        let (item, list) = pop2(args);
        let mut items = want_list(&list)?.to_vec();
        items.push(item);
        Ok(Value::List(ListValue::from_vec(items)))
    });
    def("item", 2, |_, _, args| {
        let (index, seq) = pop2(args);
        let index = want_int(&index)?;
        match seq {
            Value::List(list) => {
                let items = list.to_vec();
                let at = seq_index(index, items.len())?;
                Ok(items[at].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let at = seq_index(index, chars.len())?;
                Ok(Value::Str(chars[at].to_string()))
            }
            other => Err(mismatch("a list or word", &other)),
        }
    });
    def("iseq", 2, |_, _, args| {
        let (a, b) = pop2(args);
        let (a, b) = (want_int(&a)?, want_int(&b)?);
        let items: Vec<Value> = if a <= b {
            (a..=b).map(Value::Int).collect()
        } else {
            (b..=a).rev().map(Value::Int).collect()
        };
        Ok(Value::List(ListValue::from_vec(items)))
    });
    def("concat", 2, |_, _, args| {
        let (a, b) = pop2(args);
        let mut items = seq_elements(&a)?;
        items.extend(seq_elements(&b)?);
        Ok(Value::List(ListValue::from_vec(items)))
    });
    def("slice", 3, |_, _, args| {
        let (lo, hi, seq) = pop3(args);
        let (lo, hi) = (want_int(&lo)?, want_int(&hi)?);
        match seq {
            Value::List(list) => {
                let items = list.to_vec();
                let (start, end) = slice_bounds(lo, hi, items.len());
                Ok(Value::List(ListValue::from_vec(items[start..end].to_vec())))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = slice_bounds(lo, hi, chars.len());
                Ok(Value::Str(chars[start..end].iter().collect()))
            }
            other => Err(mismatch("a list or word", &other)),
        }
    });
    def("setitem", 3, |_, _, args| {
        let (index, seq, value) = pop3(args);
        let list = want_list(&seq)?;
        let at = seq_index(want_int(&index)?, list.len())?;
        list.items.borrow_mut()[at] = value;
        Ok(Value::Nil)
    });
    def("array", 1, |_, _, args| {
        let n = want_int(&pop1(args))?.max(0) as usize;
        Ok(Value::List(ListValue::from_vec(vec![Value::Nil; n])))
    });

    // Strings.
    def("lowercase", 1, |_, _, args| {
        Ok(Value::Str(want_str(pop1(args))?.to_lowercase()))
    });
    def("uppercase", 1, |_, _, args| {
        Ok(Value::Str(want_str(pop1(args))?.to_uppercase()))
    });
    def("trim", 1, |_, _, args| {
        Ok(Value::Str(want_str(pop1(args))?.trim().to_string()))
    });
    def("ltrim", 1, |_, _, args| {
        Ok(Value::Str(want_str(pop1(args))?.trim_start().to_string()))
    });
    def("rtrim", 1, |_, _, args| {
        Ok(Value::Str(want_str(pop1(args))?.trim_end().to_string()))
    });
    def("split", 1, |_, _, args| {
        let s = want_str(pop1(args))?;
        let words = s
            .split_whitespace()
            .map(|word| Value::Str(word.to_string()))
            .collect();
        Ok(Value::List(ListValue::from_vec(words)))
    });
    def("join", 1, |_, _, args| {
        Ok(Value::Str(want_list(&pop1(args))?.join_spaces()))
    });
    def("split-by", 2, |_, _, args| {
        let (sep, s) = pop2(args);
        let (sep, s) = (want_str(sep)?, want_str(s)?);
        if sep.is_empty() {
            return Err(RuntimeError::TypeMismatch {
                message: "empty separator".to_string(),
            });
        }
        let parts = s
            .split(sep.as_str())
            .map(|part| Value::Str(part.to_string()))
            .collect();
        Ok(Value::List(ListValue::from_vec(parts)))
    });
    def("join-by", 2, |_, _, args| {
        let (sep, list) = pop2(args);
        let sep = want_str(sep)?;
        let joined = want_list(&list)?
            .to_vec()
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(&sep);
        Ok(Value::Str(joined))
    });
    def("word", 2, |_, _, args| {
        let (a, b) = pop2(args);
        Ok(Value::Str(format!("{a}{b}")))
    });
    def("starts-with", 2, |_, _, args| {
        let (prefix, s) = pop2(args);
        Ok(Value::Bool(want_str(s)?.starts_with(&want_str(prefix)?)))
    });
    def("ends-with", 2, |_, _, args| {
        let (suffix, s) = pop2(args);
        Ok(Value::Bool(want_str(s)?.ends_with(&want_str(suffix)?)))
    });
    def("empty", 0, |_, _, _| Ok(Value::Str(String::new())));
    def("space", 0, |_, _, _| Ok(Value::Str(" ".to_string())));
    def("tab", 0, |_, _, _| Ok(Value::Str("\t".to_string())));
    def("nl", 0, |_, _, _| Ok(Value::Str("\n".to_string())));

    // Conversions and predicates.
    def("to-string", 1, |_, _, args| {
        Ok(Value::Str(pop1(args).to_string()))
    });
    def("parse-int", 1, |_, _, args| {
        let s = want_str(pop1(args))?;
        s.trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| RuntimeError::TypeMismatch {
                message: format!("cannot parse as an integer: {s}"),
            })
    });
    def("parse-float", 1, |_, _, args| {
        let s = want_str(pop1(args))?;
        s.trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| RuntimeError::TypeMismatch {
                message: format!("cannot parse as a number: {s}"),
            })
    });
    def("is-string", 1, |_, _, args| {
        Ok(Value::Bool(matches!(pop1(args), Value::Str(_))))
    });
    def("is-bool", 1, |_, _, args| {
        Ok(Value::Bool(matches!(pop1(args), Value::Bool(_))))
    });
    def("is-int", 1, |_, _, args| {
        Ok(Value::Bool(matches!(pop1(args), Value::Int(_))))
    });
    def("is-float", 1, |_, _, args| {
        Ok(Value::Bool(matches!(pop1(args), Value::Float(_))))
    });
    def("is-list", 1, |_, _, args| {
        Ok(Value::Bool(matches!(pop1(args), Value::List(_))))
    });
    def("is-dict", 1, |_, _, args| {
        Ok(Value::Bool(matches!(pop1(args), Value::Dict(_))))
    });
    def("is-fn", 1, |_, _, args| {
        Ok(Value::Bool(matches!(pop1(args), Value::Closure(_))))
    });
    def("is-proc", 1, |_, _, args| {
        Ok(Value::Bool(matches!(pop1(args), Value::Proc(_))))
    });
    def("is-space", 1, |_, _, args| {
        Ok(Value::Bool(str_all(&pop1(args), char::is_whitespace)))
    });
    def("is-alpha", 1, |_, _, args| {
        Ok(Value::Bool(str_all(&pop1(args), char::is_alphabetic)))
    });
    def("is-alnum", 1, |_, _, args| {
        Ok(Value::Bool(str_all(&pop1(args), char::is_alphanumeric)))
    });
    def("is-digit", 1, |_, _, args| {
        Ok(Value::Bool(str_all(&pop1(args), |c| c.is_ascii_digit())))
    });

    // Dictionaries.
    def("dict", 1, |_, _, args| {
        let init = want_list(&pop1(args))?.to_vec();
        let dict = DictValue::new();
        let mut i = 0;
        while i < init.len() {
            let key = DictKey::from_value(&init[i])?;
            let value = init.get(i + 1).cloned().unwrap_or(Value::Nil);
            dict.insert(key, value);
            i += 2;
        }
        Ok(Value::Dict(dict))
    });
    def("get", 2, |_, _, args| {
        let (dict, key) = pop2(args);
        let dict = want_dict(&dict)?;
        dict.get(&DictKey::from_value(&key)?)
            .ok_or_else(|| RuntimeError::MissingKey {
                key: key.to_string(),
            })
    });
    def("put", 3, |_, _, args| {
        let (dict, key, value) = pop3(args);
        want_dict(&dict)?.insert(DictKey::from_value(&key)?, value);
        Ok(Value::Nil)
    });
    def("del", 2, |_, _, args| {
        let (dict, key) = pop2(args);
        match want_dict(&dict)?.remove(&DictKey::from_value(&key)?) {
            Some(_) => Ok(Value::Nil),
            None => Err(RuntimeError::MissingKey {
                key: key.to_string(),
            }),
        }
    });
    def("keys", 1, |_, _, args| {
        Ok(Value::List(ListValue::from_vec(
            want_dict(&pop1(args))?.keys(),
        )))
    });

    // Randomness and time.
    def("rnd", 0, |interp, _, _| Ok(Value::Float(interp.rng.gen::<f64>())));
    def("random", 2, |interp, _, args| {
        let (a, b) = pop2(args);
        let (a, b) = (want_int(&a)?, want_int(&b)?);
        if a > b {
            return Err(RuntimeError::TypeMismatch {
                message: format!("empty range for random: {a} to {b}"),
            });
        }
        Ok(Value::Int(interp.rng.gen_range(a..=b)))
    });
    def("rerandom", 1, |interp, _, args| {
        interp.reseed(want_int(&pop1(args))? as u64);
        Ok(Value::Nil)
    });
    def("timer", 0, |_, _, _| {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0);
        Ok(Value::Float(seconds))
    });
    def("procedures", 0, |interp, _, _| {
        let mut names: Vec<String> = interp.procedures.keys().cloned().collect();
        names.sort();
        Ok(Value::List(ListValue::from_vec(
            names.into_iter().map(Value::Str).collect(),
        )))
    });

    drop(def);
    table
}

fn builtin_catch(
    interp: &mut Interpreter,
    scope: &ScopeRef,
    args: Vec<Value>,
) -> RuntimeResult<Value> {
    let (name, code) = pop2(args);
    let varname = want_str(name)?.to_lowercase();
    let code = want_code(&code)?;
    scope.define(&varname, Value::Nil);
    // Recovery zone: evaluator errors and host panics from the body both
    // land in the named variable as text.
    match panic::catch_unwind(AssertUnwindSafe(|| interp.run(&code, scope))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            scope.define(&varname, Value::Str(err.to_string()));
            Ok(Value::Nil)
        }
        Err(payload) => {
            scope.define(&varname, Value::Str(panic_message(payload)));
            Ok(Value::Nil)
        }
    }
}

fn builtin_ifelse(
    interp: &mut Interpreter,
    scope: &ScopeRef,
    args: Vec<Value>,
) -> RuntimeResult<Value> {
    let (cond, when_true, when_false) = pop3(args);
    let branch = if cond.truthy()? { when_true } else { when_false };
    // Branches are raw word lists, parsed when taken so they see the
    // current procedure table.
    let words = want_words(&branch)?;
    let code = interp.parse_words(words.iter().map(String::as_str))?;
    let values = interp.results(&code, scope)?;
    Ok(values.into_iter().next().unwrap_or(Value::Nil))
}

fn builtin_while(
    interp: &mut Interpreter,
    scope: &ScopeRef,
    args: Vec<Value>,
) -> RuntimeResult<Value> {
    let (cond, body) = pop2(args);
    let words = want_words(&cond)?;
    let cond_code = interp.parse_words(words.iter().map(String::as_str))?;
    let body_code = want_code(&body)?;
    loop {
        let flag = interp
            .results(&cond_code, scope)?
            .into_iter()
            .next()
            .unwrap_or(Value::Nil);
        if !flag.truthy()? {
            return Ok(Value::Nil);
        }
        let value = interp.run(&body_code, scope)?;
        if scope.is_returning() {
            return Ok(value);
        }
        if scope.is_continuing() {
            scope.set_continuing(false);
        } else if scope.is_breaking() {
            scope.set_breaking(false);
            return Ok(Value::Nil);
        }
    }
}

fn builtin_for(
    interp: &mut Interpreter,
    scope: &ScopeRef,
    args: Vec<Value>,
) -> RuntimeResult<Value> {
    let (name, init, limit, step, body) = pop5(args);
    let varname = want_str(name)?.to_lowercase();
    let body_code = want_code(&body)?;
    // The loop variable is always local, and read back each iteration so
    // the body may adjust it.
    scope.define(&varname, init.clone());
    let ascending = limit.try_cmp(&init)? != Ordering::Less;
    loop {
        let current = scope.get_local(&varname).unwrap_or(Value::Nil);
        let keep = match current.try_cmp(&limit)? {
            Ordering::Less => ascending,
            Ordering::Equal => true,
            Ordering::Greater => !ascending,
        };
        if !keep {
            return Ok(Value::Nil);
        }
        let value = interp.run(&body_code, scope)?;
        if scope.is_returning() {
            return Ok(value);
        }
        if scope.is_continuing() {
            scope.set_continuing(false);
        } else if scope.is_breaking() {
            scope.set_breaking(false);
            return Ok(Value::Nil);
        }
        let current = scope.get_local(&varname).unwrap_or(Value::Nil);
        scope.define(
            &varname,
            numeric(current, step.clone(), i64::wrapping_add, |x, y| x + y),
        );
    }
}

fn builtin_foreach(
    interp: &mut Interpreter,
    scope: &ScopeRef,
    args: Vec<Value>,
) -> RuntimeResult<Value> {
    let (name, items, body) = pop3(args);
    let varname = want_str(name)?.to_lowercase();
    let body_code = want_code(&body)?;
    for item in seq_elements(&items)? {
        scope.define(&varname, item);
        let value = interp.run(&body_code, scope)?;
        if scope.is_returning() {
            return Ok(value);
        }
        if scope.is_continuing() {
            scope.set_continuing(false);
        } else if scope.is_breaking() {
            scope.set_breaking(false);
            break;
        }
    }
    Ok(Value::Nil)
}

fn make_closure(params: &Value, body: &Value, scope: &ScopeRef) -> RuntimeResult<ClosureValue> {
    let params = want_words(params)?
        .into_iter()
        .map(|name| name.to_lowercase())
        .collect();
    Ok(ClosureValue {
        params: Rc::new(params),
        body: want_list(body)?,
        scope: scope.clone(),
    })
}

fn call_function(
    interp: &mut Interpreter,
    scope: &ScopeRef,
    callee: &Value,
    args: Vec<Value>,
) -> RuntimeResult<Value> {
    match callee {
        Value::Closure(closure) => interp.apply_closure(closure, args),
        Value::Proc(proc) => {
            if proc.arity != args.len() {
                return Err(RuntimeError::ArityMismatch {
                    expected: proc.arity,
                    received: args.len(),
                });
            }
            (proc.code)(interp, scope, args)
        }
        other => Err(mismatch("a function", other)),
    }
}

fn numeric(a: Value, b: Value, int_op: fn(i64, i64) -> i64, float_op: fn(f64, f64) -> f64) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(int_op(x, y)),
        (Value::Int(x), Value::Float(y)) => Value::Float(float_op(x as f64, y)),
        (Value::Float(x), Value::Int(y)) => Value::Float(float_op(x, y as f64)),
        (Value::Float(x), Value::Float(y)) => Value::Float(float_op(x, y)),
        _ => Value::Float(f64::NAN),
    }
}

fn pop1(args: Vec<Value>) -> Value {
    args.into_iter().next().unwrap_or(Value::Nil)
}

fn pop2(args: Vec<Value>) -> (Value, Value) {
    let mut it = args.into_iter();
    let a = it.next().unwrap_or(Value::Nil);
    let b = it.next().unwrap_or(Value::Nil);
    (a, b)
}

fn pop3(args: Vec<Value>) -> (Value, Value, Value) {
    let mut it = args.into_iter();
    let a = it.next().unwrap_or(Value::Nil);
    let b = it.next().unwrap_or(Value::Nil);
    let c = it.next().unwrap_or(Value::Nil);
    (a, b, c)
}

fn pop5(args: Vec<Value>) -> (Value, Value, Value, Value, Value) {
    let mut it = args.into_iter();
    let a = it.next().unwrap_or(Value::Nil);
    let b = it.next().unwrap_or(Value::Nil);
    let c = it.next().unwrap_or(Value::Nil);
    let d = it.next().unwrap_or(Value::Nil);
    let e = it.next().unwrap_or(Value::Nil);
    (a, b, c, d, e)
}

fn mismatch(expected: &str, got: &Value) -> RuntimeError {
    RuntimeError::TypeMismatch {
        message: format!("expected {expected}, got {}", got.kind()),
    }
}

fn empty_seq(what: &str) -> RuntimeError {
    RuntimeError::TypeMismatch {
        message: format!("{what} of an empty sequence"),
    }
}

fn want_str(value: Value) -> RuntimeResult<String> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(mismatch("a word", &other)),
    }
}

fn want_list(value: &Value) -> RuntimeResult<ListValue> {
    match value {
        Value::List(list) => Ok(list.clone()),
        other => Err(mismatch("a list", other)),
    }
}

fn want_dict(value: &Value) -> RuntimeResult<DictValue> {
    match value {
        Value::Dict(dict) => Ok(dict.clone()),
        other => Err(mismatch("a dict", other)),
    }
}

fn want_code(value: &Value) -> RuntimeResult<Vec<Value>> {
    Ok(want_list(value)?.to_vec())
}

/// A list whose elements are all words: the shape `while`, `ifelse` and
/// `parse` expect for code still in source form.
fn want_words(value: &Value) -> RuntimeResult<Vec<String>> {
    want_list(value)?
        .to_vec()
        .into_iter()
        .map(want_str)
        .collect()
}

fn want_int(value: &Value) -> RuntimeResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Float(x) => Ok(x.trunc() as i64),
        other => Err(mismatch("a number", other)),
    }
}

fn want_float(value: &Value) -> RuntimeResult<f64> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(x) => Ok(*x),
        other => Err(mismatch("a number", other)),
    }
}

fn seq_elements(value: &Value) -> RuntimeResult<Vec<Value>> {
    match value {
        Value::List(list) => Ok(list.to_vec()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        other => Err(mismatch("a list or word", other)),
    }
}

fn seq_index(index: i64, len: usize) -> RuntimeResult<usize> {
    let len = len as i64;
    let at = if index < 0 { len + index } else { index };
    if at < 0 || at >= len {
        return Err(RuntimeError::TypeMismatch {
            message: format!("index out of range: {index}"),
        });
    }
    Ok(at as usize)
}

fn slice_bounds(lo: i64, hi: i64, len: usize) -> (usize, usize) {
    let clamp = |i: i64| -> usize {
        let len = len as i64;
        let at = if i < 0 { len + i } else { i };
        at.clamp(0, len) as usize
    };
    let start = clamp(lo);
    (start, clamp(hi).max(start))
}

fn str_all(value: &Value, pred: fn(char) -> bool) -> bool {
    matches!(value, Value::Str(s) if !s.is_empty() && s.chars().all(pred))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic in interpreter".to_string()
    }
}
