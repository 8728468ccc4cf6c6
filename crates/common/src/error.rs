/// An error type that can carry a bare message.
///
/// Crates implement this for their `Error` and then call [`impl_context!`]
/// to get `.context()` / `.with_context()` on results and options.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;

    /// `"<context>: <cause>"`, the shape every wrapped error message takes.
    fn wrap(context: &str, cause: impl std::fmt::Display) -> Self {
        Self::from_message(format!("{context}: {cause}"))
    }
}

/// Define a crate-local `Context` trait for the crate's `Error` and
/// `Result<T>`, which must be in scope where the macro is invoked.
///
/// ```ignore
/// etm_common::impl_context!();
///
/// let dir = dirs.first().context("no data directory")?;
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;

            fn with_context<C: Into<String>>(self, context: impl FnOnce() -> C) -> Result<T>;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.map_err(|cause| <Error as $crate::FromMessage>::wrap(&context.into(), cause))
            }

            fn with_context<C: Into<String>>(self, context: impl FnOnce() -> C) -> Result<T> {
                self.map_err(|cause| <Error as $crate::FromMessage>::wrap(&context().into(), cause))
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }

            fn with_context<C: Into<String>>(self, context: impl FnOnce() -> C) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context().into()))
            }
        }
    };
}
