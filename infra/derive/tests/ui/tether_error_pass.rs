use std::borrow::Cow;
use tether_derive::tether_error;

#[tether_error]
pub enum DemoError {
    #[error("I/O failure{}: {source}", format_context(.context))]
    Io {
        #[source]
        source: std::io::Error,
        context: Option<Cow<'static, str>>,
    },

    #[error("Not found{}: {message}", format_context(.context))]
    NotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Internal fault{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

fn open_missing() -> Result<(), DemoError> {
    std::fs::File::open("/definitely/not/here").context("opening fixture")?;
    Ok(())
}

fn main() {
    let err = open_missing().expect_err("fixture must not exist");
    assert!(err.to_string().contains("(opening fixture)"));

    let internal: DemoError = "broken invariant".into();
    let with_context: Result<(), DemoError> = Err(internal);
    let err = with_context.context("during test").expect_err("still an error");
    assert!(matches!(err, DemoError::Internal { context: Some(_), .. }));
}
