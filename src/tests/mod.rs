use crate::runtime::{Interpreter, RuntimeError, RuntimeResult, ScopeRef, Value};
use std::cell::RefCell;
use std::io::{self, Cursor, Write};
use std::rc::Rc;
use tempfile::tempdir;

/// Shared capture sink so tests can read back what the program printed.
#[derive(Clone, Default)]
struct CaptureBuf(Rc<RefCell<Vec<u8>>>);

impl Write for CaptureBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CaptureBuf {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

struct Session {
    interp: Interpreter,
    scope: ScopeRef,
    out: CaptureBuf,
}

impl Session {
    fn new() -> Self {
        Self::with_input("")
    }

    fn with_input(input: &str) -> Self {
        let out = CaptureBuf::default();
        let interp = Interpreter::with_io(
            Box::new(Cursor::new(input.to_string().into_bytes())),
            Box::new(out.clone()),
        );
        Session {
            interp,
            scope: ScopeRef::root(),
            out,
        }
    }

    /// Tokenize line by line (list literals close where they open, as with
    /// files) and collect the top-level results.
    fn try_results(&mut self, source: &str) -> RuntimeResult<Vec<Value>> {
        let mut code = Vec::new();
        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            code.extend(self.interp.parse_words(line.split_whitespace())?);
        }
        self.interp.results(&code, &self.scope)
    }

    fn results(&mut self, source: &str) -> Vec<Value> {
        self.try_results(source)
            .unwrap_or_else(|err| panic!("evaluation failed: {err}"))
    }

    fn stdout(&self) -> String {
        self.out.text()
    }
}

#[test]
fn addition_yields_a_top_level_result() {
    let mut session = Session::new();
    assert_eq!(session.results("add 2 3"), vec![Value::Int(5)]);
}

#[test]
fn make_binds_and_print_reads_back() {
    let mut session = Session::new();
    let values = session.results("make x 10 print :x");
    assert!(values.is_empty());
    assert_eq!(session.stdout(), "10\n");
}

#[test]
fn for_counts_upward() {
    let mut session = Session::new();
    session.results("for i 1 3 1 do print :i end");
    assert_eq!(session.stdout(), "1\n2\n3\n");
}

#[test]
fn for_counts_downward_when_the_limit_is_below_the_start() {
    let mut session = Session::new();
    session.results("for i 3 1 -1 do print :i end");
    assert_eq!(session.stdout(), "3\n2\n1\n");
}

#[test]
fn functions_define_and_call() {
    let mut session = Session::new();
    session.results("function sq [n] do return mul :n :n end print sq 7");
    assert_eq!(session.stdout(), "49\n");
}

#[test]
fn catch_stores_the_thrown_message() {
    let mut session = Session::new();
    session.results("catch err do throw bad end print :err");
    assert_eq!(session.stdout(), "bad\n");
}

#[test]
fn catch_stores_evaluator_errors_too() {
    let mut session = Session::new();
    session.results("catch err do print :missing end print :err");
    assert_eq!(session.stdout(), "Undefined variable: missing\n");
}

#[test]
fn catch_leaves_nil_on_success() {
    let mut session = Session::new();
    let values = session.results("catch err do ignore add 1 2 end print is-string :err");
    assert!(values.is_empty());
    assert_eq!(session.stdout(), "false\n");
}

#[test]
fn return_escapes_through_catch() {
    let mut session = Session::new();
    session.results("function f [] do catch err do return 42 end return 0 end print f");
    assert_eq!(session.stdout(), "42\n");
}

#[test]
fn ifelse_takes_the_true_branch() {
    let mut session = Session::new();
    session.results("ifelse gt 2 1 [print yes] [print no]");
    assert_eq!(session.stdout(), "yes\n");
}

#[test]
fn ifelse_yields_the_branch_value() {
    let mut session = Session::new();
    let values = session.results("print ifelse lt 1 2 [add 1 1] [add 2 2]");
    assert!(values.is_empty());
    assert_eq!(session.stdout(), "2\n");
}

#[test]
fn foreach_walks_a_literal_list() {
    let mut session = Session::new();
    session.results("foreach w [a b c] do print :w end");
    assert_eq!(session.stdout(), "a\nb\nc\n");
}

#[test]
fn while_observes_break_and_clears_the_flag() {
    let mut session = Session::new();
    session.results(
        "make i 0 while [lt :i 5] do make i add :i 1 if eq :i 3 do break end end print :i",
    );
    assert_eq!(session.stdout(), "3\n");
    assert!(!session.scope.is_breaking());
    assert!(!session.scope.is_continuing());
}

#[test]
fn continue_skips_to_the_next_iteration() {
    let mut session = Session::new();
    session.results("for i 1 4 1 do if eq :i 2 do continue end print :i end");
    assert_eq!(session.stdout(), "1\n3\n4\n");
    assert!(!session.scope.is_continuing());
}

#[test]
fn return_propagates_out_of_a_loop() {
    let mut session = Session::new();
    session.results(
        "function find [] do for i 1 10 1 do if eq :i 4 do return :i end end return 0 end \
         print find",
    );
    assert_eq!(session.stdout(), "4\n");
    assert!(!session.scope.is_returning());
}

#[test]
fn test_slot_drives_iftrue_and_iffalse() {
    let mut session = Session::new();
    session.results("test gt 2 1 iftrue do print yes end iffalse do print no end");
    assert_eq!(session.stdout(), "yes\n");
}

#[test]
fn iftrue_without_test_fails() {
    let mut session = Session::new();
    assert!(matches!(
        session.try_results("iftrue do print yes end"),
        Err(RuntimeError::TestNotSet)
    ));
}

#[test]
fn make_writes_through_from_inner_frames() {
    let mut session = Session::new();
    session.results("make x 1 function setx [] do make x 99 end setx print :x");
    assert_eq!(session.stdout(), "99\n");
}

#[test]
fn localmake_shadows_instead() {
    let mut session = Session::new();
    session.results("make x 1 function setx [] do localmake x 99 end setx print :x");
    assert_eq!(session.stdout(), "1\n");
}

#[test]
fn numeric_tower_in_the_language() {
    let mut session = Session::new();
    session.results("print add 2 3 print add 2 0.5 print div 1 2 print mod -7 3");
    assert_eq!(session.stdout(), "5\n2.5\n0.5\n2\n");
}

#[test]
fn comparison_errors_are_catchable() {
    let mut session = Session::new();
    session.results("catch err do ignore lt 1 x end print :err");
    assert_eq!(session.stdout(), "Cannot compare integer with string\n");
}

#[test]
fn sequences_preserve_their_kind() {
    let mut session = Session::new();
    session.results("print first [hello world] print butfirst abc print count abcd");
    assert_eq!(session.stdout(), "hello\nbc\n4\n");
}

#[test]
fn slice_supports_negative_bounds() {
    let mut session = Session::new();
    session.results("print slice 1 -1 [a b c d] print slice -2 99 abcde");
    assert_eq!(session.stdout(), "b c\nde\n");
}

#[test]
fn setitem_mutates_in_place_and_copy_detaches() {
    let mut session = Session::new();
    session.results("make l [a b c] setitem 1 :l z print :l");
    assert_eq!(session.stdout(), "a z c\n");

    let mut session = Session::new();
    session.results("make l [a b c] make m copy :l setitem 0 :m z print :l print :m");
    assert_eq!(session.stdout(), "a b c\nz b c\n");
}

#[test]
fn iseq_runs_both_directions() {
    let mut session = Session::new();
    session.results("print iseq 1 4 print iseq 3 1");
    assert_eq!(session.stdout(), "1 2 3 4\n3 2 1\n");
}

#[test]
fn parse_then_run_executes_raw_words() {
    let mut session = Session::new();
    session.results("run parse [print hi]");
    assert_eq!(session.stdout(), "hi\n");
}

#[test]
fn results_collects_every_value() {
    let mut session = Session::new();
    session.results("print results parse [add 1 2 add 3 4]");
    assert_eq!(session.stdout(), "3 7\n");
}

#[test]
fn map_and_filter_apply_closures() {
    let mut session = Session::new();
    session.results("print map fn [x] do return mul :x :x end iseq 1 3");
    assert_eq!(session.stdout(), "1 4 9\n");

    let mut session = Session::new();
    session.results("print filter fn [x] do return gt :x 2 end iseq 1 4");
    assert_eq!(session.stdout(), "3 4\n");
}

#[test]
fn map_accepts_built_in_procedures() {
    // `first parse [abs]` is the only way to hold a Proc as a value: the
    // parser binds the name inside the re-parsed list.
    let mut session = Session::new();
    session.results("print map first parse [abs] iseq -2 0");
    assert_eq!(session.stdout(), "2 1 0\n");
}

#[test]
fn apply_checks_arity() {
    let mut session = Session::new();
    let outcome =
        session.try_results("function f [a b] do return :a end apply thing f fput 1 []");
    assert!(matches!(
        outcome,
        Err(RuntimeError::ArityMismatch {
            expected: 2,
            received: 1
        })
    ));
}

#[test]
fn arity_reports_for_closures_and_procs() {
    let mut session = Session::new();
    session.results("function f [a b] do return :a end print arity thing f");
    assert_eq!(session.stdout(), "2\n");
}

#[test]
fn dict_operations_round_out() {
    let mut session = Session::new();
    session.results("make d dict [a 1 b 2] print get :d a print count :d put :d c 3 print get :d c");
    assert_eq!(session.stdout(), "1\n2\n3\n");
}

#[test]
fn missing_dict_keys_are_reported() {
    let mut session = Session::new();
    session.results("make d dict [a 1] catch err do ignore get :d zz end print :err");
    assert_eq!(session.stdout(), "Missing dictionary key: zz\n");
}

#[test]
fn dict_with_odd_initializer_gets_nil() {
    let mut session = Session::new();
    session.results("make d dict [a 1 b] print count :d print eq get :d b nil");
    assert_eq!(session.stdout(), "2\ntrue\n");
}

#[test]
fn string_builtins() {
    let mut session = Session::new();
    session.results("print word foo bar print uppercase abc print join-by - [a b c]");
    assert_eq!(session.stdout(), "foobar\nABC\na-b-c\n");
}

#[test]
fn predicates_examine_kinds() {
    let mut session = Session::new();
    session.results("print is-int 5 print is-string hello print is-alpha abc print is-digit to-string 123");
    assert_eq!(session.stdout(), "true\ntrue\ntrue\ntrue\n");
}

#[test]
fn readword_and_readlist_take_one_line_each() {
    let mut session = Session::with_input("hello world\nfoo bar\n");
    session.results("print readword print count readlist");
    assert_eq!(session.stdout(), "hello world\n2\n");
}

#[test]
fn readword_yields_nil_at_end_of_input() {
    let mut session = Session::new();
    let values = session.results("ignore readword print eq readword nil");
    assert!(values.is_empty());
    assert_eq!(session.stdout(), "true\n");
}

#[test]
fn rerandom_makes_the_generator_deterministic() {
    let mut session = Session::new();
    session.results("rerandom 42 make a random 1 1000000 rerandom 42 make b random 1 1000000 print eq :a :b");
    assert_eq!(session.stdout(), "true\n");
}

#[test]
fn load_runs_a_script_file() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("script.lunar");
    std::fs::write(
        &path,
        "make greeting hello\n\n  print :greeting\n-- trailing comment\n",
    )
    .expect("write script");

    let mut session = Session::new();
    session
        .interp
        .load(&path, &session.scope)
        .expect("load script");
    assert_eq!(session.stdout(), "hello\n");
}

#[test]
fn procedures_lists_the_table() {
    let mut session = Session::new();
    let values = session.results("count procedures");
    let Some(Value::Int(count)) = values.first() else {
        panic!("expected a count");
    };
    assert!(*count > 100, "table unexpectedly small: {count}");
}
