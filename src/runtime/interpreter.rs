use crate::language::parser;
use crate::runtime::builtins;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::scope::ScopeRef;
use crate::runtime::value::{ClosureValue, ListValue, ProcValue, Value};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Owns everything shared by the built-ins: the procedure table, the random
/// number generator and the standard streams. Evaluation itself is the
/// arity-directed walk of `eval_next`, re-entered freely by built-ins.
pub struct Interpreter {
    pub(crate) procedures: HashMap<String, ProcValue>,
    pub(crate) rng: StdRng,
    pub(crate) input: Box<dyn BufRead>,
    pub(crate) output: Box<dyn Write>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_io(
            Box::new(io::BufReader::new(io::stdin())),
            Box::new(io::stdout()),
        )
    }

    pub fn with_io(input: Box<dyn BufRead>, output: Box<dyn Write>) -> Self {
        Self {
            procedures: builtins::procedures(),
            rng: StdRng::from_entropy(),
            input,
            output,
        }
    }

    /// Tokenize one stream of words against the current procedure table.
    pub fn parse_words<'a, I>(&self, words: I) -> RuntimeResult<Vec<Value>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        parser::parse(words, &self.procedures)
    }

    /// Evaluate exactly one expression starting at `cursor`, yielding the
    /// value and the cursor one past what it consumed.
    pub fn eval_next(
        &mut self,
        code: &[Value],
        cursor: usize,
        scope: &ScopeRef,
    ) -> RuntimeResult<(Value, usize)> {
        let Some(token) = code.get(cursor) else {
            return Err(RuntimeError::UnexpectedEndOfInput);
        };
        match token {
            Value::Proc(proc) => {
                let proc = *proc;
                let mut cursor = cursor + 1;
                let args = self.collect_args(code, &mut cursor, scope, proc.arity, proc.name)?;
                let value = (proc.code)(self, scope, args)?;
                Ok((value, cursor))
            }
            Value::Str(word) => {
                if let Some(name) = word.strip_prefix(':') {
                    // The parser already lowercased variable references.
                    let value = scope.lookup(name)?;
                    Ok((value, cursor + 1))
                } else if word == "do" {
                    let (block, cursor) = Self::scan_block(code, cursor + 1)?;
                    Ok((Value::List(block), cursor))
                } else {
                    let lowered = word.to_lowercase();
                    match scope.get(&lowered) {
                        Some(Value::Closure(closure)) => {
                            let mut cursor = cursor + 1;
                            let args = self.collect_args(
                                code,
                                &mut cursor,
                                scope,
                                closure.params.len(),
                                &lowered,
                            )?;
                            let value = self.apply_closure(&closure, args)?;
                            Ok((value, cursor))
                        }
                        // Anything else leaves the word as a string literal.
                        _ => Ok((Value::Str(word.clone()), cursor + 1)),
                    }
                }
            }
            other => Ok((other.clone(), cursor + 1)),
        }
    }

    fn collect_args(
        &mut self,
        code: &[Value],
        cursor: &mut usize,
        scope: &ScopeRef,
        count: usize,
        name: &str,
    ) -> RuntimeResult<Vec<Value>> {
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            if *cursor >= code.len() {
                return Err(RuntimeError::NotEnoughArguments {
                    name: name.to_string(),
                });
            }
            let (value, next) = self.eval_next(code, *cursor, scope)?;
            args.push(value);
            *cursor = next;
        }
        Ok(args)
    }

    /// Copy tokens into a fresh list up to the matching `end`; nested blocks
    /// become single nested List tokens. Returns the cursor one past `end`.
    pub fn scan_block(code: &[Value], mut cursor: usize) -> RuntimeResult<(ListValue, usize)> {
        let mut block = Vec::new();
        loop {
            match code.get(cursor) {
                None => return Err(RuntimeError::UnexpectedEndOfInput),
                Some(Value::Str(word)) if word == "end" => {
                    return Ok((ListValue::from_vec(block), cursor + 1));
                }
                Some(Value::Str(word)) if word == "do" => {
                    let (inner, next) = Self::scan_block(code, cursor + 1)?;
                    block.push(Value::List(inner));
                    cursor = next;
                }
                Some(other) => {
                    block.push(other.clone());
                    cursor += 1;
                }
            }
        }
    }

    /// Statement-sequence evaluation: values must be consumed, control-flow
    /// flags end the walk early. Underlies most control structures.
    pub fn run(&mut self, code: &[Value], scope: &ScopeRef) -> RuntimeResult<Value> {
        let mut cursor = 0;
        while cursor < code.len() {
            let (value, next) = self.eval_next(code, cursor, scope)?;
            if scope.is_continuing() || scope.is_breaking() {
                return Ok(Value::Nil);
            } else if scope.is_returning() {
                return Ok(value);
            } else if !value.is_nil() {
                return Err(RuntimeError::UnconsumedValue {
                    value: value.to_string(),
                });
            }
            cursor = next;
        }
        Ok(Value::Nil)
    }

    /// Expression-sequence evaluation: collect every non-nil value.
    /// Underlies `while`, `ifelse` and the command line.
    pub fn results(&mut self, code: &[Value], scope: &ScopeRef) -> RuntimeResult<Vec<Value>> {
        let mut values = Vec::new();
        let mut cursor = 0;
        while cursor < code.len() {
            let (value, next) = self.eval_next(code, cursor, scope)?;
            if scope.is_returning() {
                return Ok(vec![value]);
            }
            if scope.is_breaking() || scope.is_continuing() {
                break;
            }
            if !value.is_nil() {
                values.push(value);
            }
            cursor = next;
        }
        Ok(values)
    }

    /// Invoke a closure: fresh child of the *captured* scope, positional
    /// binding, and the return flag consumed by this frame.
    pub fn apply_closure(
        &mut self,
        closure: &ClosureValue,
        args: Vec<Value>,
    ) -> RuntimeResult<Value> {
        if closure.params.len() != args.len() {
            return Err(RuntimeError::ArityMismatch {
                expected: closure.params.len(),
                received: args.len(),
            });
        }
        let locals = closure.scope.child();
        for (name, value) in closure.params.iter().zip(args) {
            locals.define(name, value);
        }
        let body = closure.body.to_vec();
        let value = self.run(&body, &locals)?;
        locals.set_returning(false);
        Ok(value)
    }

    /// Read a source file: per line, trim, skip blanks, tokenize; then run
    /// the accumulated stream in the given scope. Parse state never crosses
    /// a line boundary, so list literals must close where they open.
    pub fn load(&mut self, path: impl AsRef<Path>, scope: &ScopeRef) -> RuntimeResult<Value> {
        let text = fs::read_to_string(path)?;
        let mut code = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            code.extend(self.parse_words(line.split_whitespace())?);
        }
        self.run(&code, scope)
    }

    /// One line from the input stream, without the trailing newline; `None`
    /// at end of input.
    pub(crate) fn read_line(&mut self) -> RuntimeResult<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    pub(crate) fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interp() -> Interpreter {
        Interpreter::with_io(Box::new(io::empty()), Box::new(io::sink()))
    }

    fn eval_all(source: &str) -> RuntimeResult<Vec<Value>> {
        let mut interp = interp();
        let scope = ScopeRef::root();
        let code = interp.parse_words(source.split_whitespace())?;
        interp.results(&code, &scope)
    }

    #[test]
    fn arity_directed_evaluation_nests() {
        assert_eq!(eval_all("add 2 mul 3 4").unwrap(), vec![Value::Int(14)]);
    }

    #[test]
    fn bare_words_evaluate_to_themselves() {
        assert_eq!(eval_all("hello").unwrap(), vec![Value::Str("hello".into())]);
    }

    #[test]
    fn missing_arguments_are_reported() {
        assert!(matches!(
            eval_all("add 2"),
            Err(RuntimeError::NotEnoughArguments { .. })
        ));
    }

    #[test]
    fn do_blocks_scan_to_matching_end() {
        let mut interp = interp();
        let code = interp
            .parse_words("do print do add end end".split_whitespace())
            .unwrap();
        let (block, cursor) = Interpreter::scan_block(&code, 1).unwrap();
        assert_eq!(cursor, code.len());
        let items = block.to_vec();
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], Value::List(_)));
    }

    #[test]
    fn unterminated_block_fails() {
        let mut interp = interp();
        let code = interp.parse_words("do print :x".split_whitespace()).unwrap();
        assert!(matches!(
            Interpreter::scan_block(&code, 1),
            Err(RuntimeError::UnexpectedEndOfInput)
        ));
    }

    #[test]
    fn run_rejects_dangling_values() {
        let mut interp = interp();
        let scope = ScopeRef::root();
        let code = interp.parse_words("add 1 2".split_whitespace()).unwrap();
        assert!(matches!(
            interp.run(&code, &scope),
            Err(RuntimeError::UnconsumedValue { .. })
        ));
    }

    #[test]
    fn closures_capture_their_defining_scope() {
        let mut interp = interp();
        let scope = ScopeRef::root();
        // make-adder closes over its parameter; the call site binding of
        // :n must not leak into the closure body.
        let source = "function make-adder [n] do return fn [m] do return add :n :m end end \
                      make add10 make-adder 10 localmake n 999 add10 5";
        let code = interp.parse_words(source.split_whitespace()).unwrap();
        let values = interp.results(&code, &scope).unwrap();
        assert_eq!(values, vec![Value::Int(15)]);
    }

    #[test]
    fn return_flag_is_consumed_by_the_closure_frame() {
        let mut interp = interp();
        let scope = ScopeRef::root();
        let source = "function id [x] do return :x end ignore id 1";
        let code = interp.parse_words(source.split_whitespace()).unwrap();
        interp.run(&code, &scope).unwrap();
        assert!(!scope.is_returning());
    }

    #[test]
    fn undefined_variable_reference_fails() {
        assert!(matches!(
            eval_all(":nope"),
            Err(RuntimeError::UndefinedVariable { .. })
        ));
    }
}
