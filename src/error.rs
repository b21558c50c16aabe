/// Message shown for every failed connection test, whatever went wrong.
pub const CONNECTION_FAILED: &str = "connection failed";

/// Creates an anyhow error tagged with the current file name and line number
#[macro_export]
macro_rules! file_error {
    ($($arg:tt)*) => {
        ::anyhow::anyhow!(
            "[{}:{}] {}",
            ::std::path::Path::new(file!())
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or(file!()),
            line!(),
            format!($($arg)*)
        )
    };
}

/// Like `file_error!`, with the causing error appended
#[macro_export]
macro_rules! file_error_with_source {
    ($source:expr, $($arg:tt)*) => {
        $crate::file_error!("{}: {}", format!($($arg)*), $source)
    };
}
