#[test]
fn tether_error_ui() {
    let t = trybuild::TestCases::new();
    t.pass("tests/ui/tether_error_pass.rs");
}
