// End-to-end language tests. Note: later tests rely on features tested in
// earlier ones.

use common::Expect::{B, F, I, S};
use common::TestEnv;

mod common;

#[test]
fn integers() {
    let mut env = TestEnv::new();
    // Arithmetic
    env.evaluates_to("(2 + 3) * 2", &[I(10)]);
    env.evaluates_to("234 / 100, 234 % 100", &[I(2), I(34)]);
    env.evaluates_to("-(2 * 2)", &[I(-4)]);
    // Comparisons
    env.evaluates_to("50 > 10, 50 < 10", &[B(true), B(false)]);
    env.evaluates_to("21 != 21, 21 == 21", &[B(false), B(true)]);
    env.evaluates_to("-3 <= 10, -7 >= -7", &[B(true), B(true)]);
    // Invalid operations
    env.panics("1 / 0");
    env.panics("0 / 0");
    env.panics("/ 5");
    env.panics("* 3");
    env.panics("(1, 3) + (2, 4)");
    env.panics("2-");
}

#[test]
fn integer_division_identity() {
    let mut env = TestEnv::new();
    for n in [-17i64, -5, 0, 3, 234, 1000] {
        for m in [-7i64, -2, 1, 10, 100] {
            env.evaluates_to(
                &format!("{n} == ({n} / {m}) * {m} + ({n} % {m})"),
                &[B(true)],
            );
        }
    }
}

#[test]
fn floats() {
    let mut env = TestEnv::new();
    // Arithmetic
    env.evaluates_to("5. / 2., .5 * 2.", &[F(2.5), F(1.0)]);
    env.evaluates_to("1. + 2., 1. - 2.", &[F(3.0), F(-1.0)]);
    env.evaluates_to("5. / 0.", &[F(f64::INFINITY)]);
    // Comparisons
    env.evaluates_to("-10. < 5., 10. > 5.", &[B(true), B(true)]);
    env.evaluates_to("inf <= 1000000., inf >= 0.", &[B(false), B(true)]);
    env.evaluates_to("nan == nan", &[B(false)]);
    // Type mixing
    env.panics("2. + 1");
    env.panics("5 / 2.");
    env.panics("0. > 1");
}

#[test]
fn variables_and_scopes() {
    let mut env = TestEnv::new();
    // Declaration
    env.panics("new_var = 1");
    env.evaluates(".new_var = 1");
    env.evaluates_to("new_var == 1", &[B(true)]);
    env.evaluates_to(".new_var", &[I(1)]);
    // Shadowing
    env.evaluates(".var = 1");
    env.evaluates_to("(.var = 2; var)", &[I(2)]);
    env.evaluates_to("var", &[I(1)]);
    // Lifetime
    env.evaluates("(.gone = 1)");
    env.panics("gone");
}

#[test]
fn assignments() {
    let mut env = TestEnv::new();
    // Multiple assignment
    env.evaluates(".a, .b = 1, 2");
    env.evaluates_to("a, b", &[I(1), I(2)]);
    // Swapping
    env.evaluates(".foo, .bar = yes, no");
    env.evaluates("foo, bar = bar, foo");
    env.evaluates_to("foo, bar", &[B(false), B(true)]);
    // Underflow: the first targets are assigned before the panic.
    env.evaluates(".var1, .var2 = 123, 456");
    env.panics(".var3, .var4, .var5 = var1, var2");
    env.evaluates_to("var3 == var1", &[B(true)]);
    env.evaluates_to("var4 == var2", &[B(true)]);
    // Overflow
    env.evaluates(".lorem, .ipsum = 'lorem', 'ipsum'");
    env.panics("lorem, ipsum = 'lorem', 'ipsum', 'dolor', 'sit', 'amet'");
    env.evaluates_to("lorem, ipsum", &[S("lorem"), S("ipsum")]);
}

#[test]
fn conditionals() {
    let mut env = TestEnv::new();
    env.evaluates(".answer = 42");
    env.evaluates_to("answer == 32 then 'it cannot be'", &[]);
    env.evaluates_to("answer == 42 then 'of course it is'", &[S("of course it is")]);
    env.evaluates_to("not (answer < 0) then 'must be so'", &[S("must be so")]);
    // Else clause
    env.evaluates(".val1, .val2 = 54, 35");
    env.evaluates_to("val1 > val2 then val1 else val2", &[I(54)]);
    env.evaluates_to("val1 == val2 then 'same' else 'different'", &[S("different")]);
    // Logical connectives short-circuit.
    env.evaluates_to("yes and no, no or yes", &[B(false), B(true)]);
    env.evaluates_to("no and (1 / 0 == 0)", &[B(false)]);
    env.evaluates_to("yes or (1 / 0 == 0)", &[B(true)]);
}

#[test]
fn functions() {
    let mut env = TestEnv::new();
    // Creation and calling
    env.evaluates(".sum = (.a, .b) -> a + b");
    env.evaluates_to("sum(13, 27)", &[I(40)]);
    env.panics("a");
    env.panics("b");
    env.evaluates(".divmod = (.a, .b) -> (a / b, a % b)");
    env.evaluates_to("divmod(32, 10)", &[I(3), I(2)]);
    // Arity
    env.evaluates(".sum3 = (.a, .b, .c) -> a + b + c");
    env.panics("sum3(1, 2, 3, 4)");
    env.evaluates_to("sum3(1, 10, 15)", &[I(26)]);
    env.panics("sum3(1, 5)");
    env.panics("sum3()");
    // Multiple return
    env.evaluates(".sum5 = (.a, .b, .c, .d, .e) -> a + b + c + d + e");
    env.evaluates(".plus_minus = .n -> (n - 1, n + 1)");
    env.evaluates_to("plus_minus 5", &[I(4), I(6)]);
    env.evaluates_to("sum5(plus_minus 2, 5, plus_minus 8)", &[I(25)]);
    // Recursion
    env.evaluates(".factorial = .n -> (n == 0 then 1 else factorial(n - 1) * n)");
    env.evaluates_to("factorial 10 == 3628800", &[B(true)]);
    env.evaluates(".f = -> f()");
    env.panics("f()");
}

#[test]
fn strings() {
    let mut env = TestEnv::new();
    env.evaluates(".empty = ''");
    env.evaluates(".some = 'some str'");
    env.evaluates_to("some, empty", &[S("some str"), S("")]);
    // Concatenation
    env.evaluates(".str1 = 'impostor'");
    env.evaluates(".str2 = 'is sus'");
    env.evaluates_to("str1 + ' ' + str2", &[S("impostor is sus")]);
    env.evaluates_to("'impostor' + ' ' + 'is sus'", &[S("impostor is sus")]);
    // Invalid operations
    env.panics("() + ''");
    env.panics("'I am ' + 17 + ' years old'");
    env.panics("'Can drive: ' + no");
    env.panics("('', '') + ('a', 'b', 'c')");
    env.panics("'That is not' 'how it works'");
}

#[test]
fn loops() {
    let mut env = TestEnv::new();
    // Pre-condition loop
    env.evaluates_to(
        ".i = 0; i != 5 repeats (i, (i = i + 1))",
        &[I(0), I(1), I(2), I(3), I(4)],
    );
    env.evaluates_to("(1 == 0) repeats (5)", &[]);
    env.panics("yes repeats 1"); // Value stack overflow
    // Post-condition loop
    env.evaluates_to(
        ".j = 0; (j = j + 1; j) until j == 7",
        &[I(1), I(2), I(3), I(4), I(5), I(6), I(7)],
    );
    env.evaluates_to("'some str' until 2 * 2 == 4", &[S("some str")]);
    env.panics("1 until no"); // Value stack overflow
}

#[test]
fn interrupting() {
    let mut env = TestEnv::new();
    env.interrupt.store(true, std::sync::atomic::Ordering::Relaxed);
    env.panics("(1 == 1) repeats ()");
    // The flag is consumed by the interrupted run.
    env.evaluates_to("2 + 2", &[I(4)]);
}

#[test]
fn arrays() {
    let mut env = TestEnv::new();
    // Creation
    env.evaluates(".five_nums = [11, 12, 13, 14, 15]");
    env.evaluates(".empty_arr = []");
    env.evaluates(".my_str = 'some_string'");
    env.evaluates(".stuff0 = [0, (.x -> x + 1), 5., my_str, no]");
    // Element access
    env.evaluates(".three_nums = [11, 12, 13]");
    env.evaluates_to("three_nums[2]", &[I(13)]);
    env.panics("three_nums[-1]");
    env.panics("three_nums[[]]");
    env.evaluates(".stuff = ['str', 0, (->), yes, no, 5]");
    env.evaluates(".num1, .num2, .bln, .str = stuff[5, 1, 3, 0]");
    env.evaluates_to("str, num2, bln", &[S("str"), I(0), B(true)]);
    // Modification
    env.evaluates(".values = ['test', -1, 3, 3, 7, ]");
    env.evaluates("values[1] = values");
    env.evaluates_to("values[1][1][1][1][1][1] is values", &[B(true)]);
    env.panics("values[-1] = no");
    env.panics("values[5] = yes");
    env.evaluates("values[0, 1, 2, 3, 4] = 'a', 'b', 'c', 'd', 'e'");
    env.evaluates_to("values[3]", &[S("d")]);
    // Generation
    env.evaluates(".ten_nums = [.i = 0; (i = i + 1; i) until i == 10]");
    env.evaluates_to("ten_nums[7] == 8", &[B(true)]);
    // Concatenation
    env.evaluates(".alpha1 = ['a', 'b', 'c']");
    env.evaluates(".alpha2 = ['d', 'e', 'f', 'g', 'h']");
    env.evaluates_to("(alpha1 + alpha2)[6, 5, 1]", &[S("g"), S("f"), S("b")]);
    env.evaluates_to("sizeof (alpha1 + alpha2) == sizeof alpha1 + sizeof alpha2", &[B(true)]);
    // Multiplication
    env.evaluates(".arr = ['test', no, 5]");
    env.evaluates_to("(arr * 5)[7]", &[B(false)]);
    env.evaluates_to("(9 * arr)[9 * 3 - 1]", &[I(5)]);
}

#[test]
fn array_concatenation_properties() {
    let mut env = TestEnv::new();
    env.evaluates(".a = [1, 2, 3]");
    env.evaluates(".b = [10, 20]");
    env.evaluates(".c = a + b");
    env.evaluates_to("sizeof c", &[I(5)]);
    env.evaluates_to("c[0], c[1], c[2]", &[I(1), I(2), I(3)]);
    env.evaluates_to("c[3], c[4]", &[I(10), I(20)]);
}

#[test]
fn objects() {
    let mut env = TestEnv::new();
    // Creation
    env.evaluates("{}");
    env.evaluates("{.str = 'a'; .int = 2; .bln = yes; }");
    env.evaluates("{1, 2, 'some str', yes}");
    env.evaluates("{.err = yes; 'unknown error'}");
    // Field access
    env.evaluates(".person = {.name = 'John'; .age = 31; .male = yes; }");
    env.evaluates_to("person.name", &[S("John")]);
    env.panics("person.friends");
    env.evaluates_to("person has name, person has friends", &[B(true), B(false)]);
    // Field modification
    env.evaluates(".dog = {.name = 'Bailey'; .breed = 'Golden retriever'; .age = 4}");
    env.evaluates("dog.age = dog.age + 1 # Happy B-Day, Bailey");
    env.evaluates_to("dog.age < 5", &[B(false)]);
    // Methods
    env.evaluates(
        ".Counter = .val -> {.value = -> val; .inc = -> (val = val + 1); .dec = -> (val = val - 1); }",
    );
    env.evaluates(".cnt = Counter(5)");
    env.evaluates_to("cnt.value()", &[I(5)]);
    env.evaluates("cnt.inc(); cnt.inc(); cnt.dec();");
    env.evaluates_to("cnt.value()", &[I(6)]);
}

#[test]
fn result_unwrapping() {
    let mut env = TestEnv::new();
    env.evaluates(".panic = -> 0 / 0");
    env.evaluates_to(
        "{1, 2, 3, no, yes, 'sus'}?",
        &[I(1), I(2), I(3), B(false), B(true), S("sus")],
    );
    env.panics("{.err = yes; {}, [], {{}}} ? panic()");
    env.evaluates_to("{.err = yes; 'boom'} ? 'ok'", &[S("ok")]);
    env.evaluates(".fail = yes");
    env.evaluates(".get_str = -> (fail then {.err = yes} else {'avevad'})");
    env.evaluates(".display_username = -> {'The username is: ' + get_str()?}");
    env.panics("display_username() ? panic()");
    env.evaluates("fail = no");
    env.evaluates_to("display_username() ? panic()", &[S("The username is: avevad")]);
}

#[test]
fn typechecking() {
    let mut env = TestEnv::new();
    env.evaluates(".int = {.check_value = .x -> x % 1}");
    env.evaluates(".f = (.x: int, .y: int) -> int: x + y");
    env.evaluates_to("f(12, 34)", &[I(46)]);
    env.panics("f('test', 'text')");
    env.panics("f()");
    env.panics("f(12, 34, 56)");
    env.evaluates(".float = {.check_value = .x -> x + 0.}");
    env.evaluates(".g = (.x: int, .y: float) -> (float, int): (y, x)");
    env.evaluates_to("g(1, 0.5)", &[F(0.5), I(1)]);
}

#[test]
fn operator_overloads() {
    let mut env = TestEnv::new();
    env.evaluates(".vec = (.x, .y) -> {.x = x; .y = y; .add = (.self, .other) -> vec(self.x + other.x, self.y + other.y)}");
    env.evaluates(".v = vec(1, 2) + vec(10, 20)");
    env.evaluates_to("v.x, v.y", &[I(11), I(22)]);
    // A callable object dispatches through its `call` field.
    env.evaluates(".adder = {.call = (.self, .a, .b) -> a + b}");
    env.evaluates_to("adder(3, 4)", &[I(7)]);
    // `sizeof` dispatches through `get_size`.
    env.evaluates(".sized = {.get_size = .self -> 99}");
    env.evaluates_to("sizeof sized", &[I(99)]);
}

#[test]
fn identity_and_equality() {
    let mut env = TestEnv::new();
    env.evaluates(".arr1 = [1, 2]");
    env.evaluates(".arr2 = [1, 2]");
    env.evaluates_to("arr1 is arr1, arr1 is arr2", &[B(true), B(false)]);
    env.evaluates_to("nul is nul, nul is 0", &[B(true), B(false)]);
    env.evaluates_to("'a' is 1", &[B(false)]);
    env.evaluates_to("nul == nul", &[B(true)]);
    env.panics("'a' == 1");
}

#[test]
fn reproducibility() {
    let mut env = TestEnv::new();
    // The same pure expression evaluates to the same pack, twice.
    let first = env.eval("(2 + 3) * 2, 'x' + 'y', [1, 2][1]").unwrap();
    let second = env.eval("(2 + 3) * 2, 'x' + 'y', [1, 2][1]").unwrap();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert!(env.vm.is_identical(*a, *b) || env.vm.display_pretty(*a) == env.vm.display_pretty(*b));
    }
}

#[test]
fn bitwise_operators() {
    let mut env = TestEnv::new();
    env.evaluates_to("12 & 10, 12 | 10, 12 ^ 10", &[I(8), I(14), I(6)]);
    env.evaluates_to("1 << 4, 256 >> 4", &[I(16), I(16)]);
    env.evaluates_to("~0", &[I(-1)]);
    env.panics("1 << 64");
    env.panics("yes & no");
}

#[test]
fn panic_reports_carry_a_stack_trace() {
    let mut env = TestEnv::new();
    env.evaluates(".inner = -> 1 / 0");
    env.evaluates(".outer = -> inner()");
    match env.eval("outer()") {
        Ok(_) => panic!("expected a panic"),
        Err(what) => assert!(what.contains("division by zero"), "unexpected report: {what}"),
    }
    let trace = env.panic_trace().expect("an error value should be on the stack");
    let functions: Vec<&str> = trace.iter().map(|entry| entry.0.as_str()).collect();
    assert!(functions.contains(&"<main>"));
    assert!(functions.contains(&"outer"));
    assert!(functions.contains(&"inner"));
    assert!(trace.iter().all(|entry| entry.1.starts_with("<test>:")));
}
