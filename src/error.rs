/// Enables logging of errors, to move forward without returning the error.
///
/// The dispatcher leans on this to isolate failing lifecycle callbacks: the
/// error is logged with enough context to identify the offending component,
/// and the surrounding transition proceeds.
pub trait LogError<T>: Sized {
    /// Logs if there was an error and converts the result into an option
    fn log(self) -> Option<T>;

    /// Logs if there was an error with a message and converts the result into an option
    fn log_context(self, ctx: &str) -> Option<T> {
        self.log_with_context(|| ctx.into())
    }

    /// Lazily logs if there was an error with a message and converts the result into an option
    fn log_with_context<Ctx: Fn() -> String>(self, ctx: Ctx) -> Option<T>;
}

impl<T, E: std::fmt::Display + 'static> LogError<T> for Result<T, E> {
    fn log(self) -> Option<T> {
        self.map_err(|e| tracing::error!("{}", display_error(&e))).ok()
    }

    fn log_with_context<Ctx: Fn() -> String>(self, ctx: Ctx) -> Option<T> {
        self.map_err(|e| {
            let ctx = ctx();
            let es = display_error(&e);
            tracing::error!("error: `{ctx}` - {es}");
        })
        .ok()
    }
}

/// use this to make sure you have a descriptive message including a stack trace
/// for anyhow errors, and otherwise just display the normal string for other
/// errors.
pub fn display_error<E: std::fmt::Display + 'static>(e: &E) -> String {
    match (e as &dyn std::any::Any).downcast_ref::<anyhow::Error>() {
        Some(nehau) => {
            let mut s = String::new();
            format_anyhow(nehau, &mut s).unwrap();
            s
        }
        None => format!("{e}"),
    }
}

fn format_anyhow<W: std::fmt::Write>(e: &anyhow::Error, f: &mut W) -> std::fmt::Result {
    write!(f, "{}", e)?;
    for i in e.chain().skip(1) {
        write!(f, ", caused by: {}", i)?;
    }
    write!(f, "\nstack backtrace:\n{}", e.backtrace())
}
