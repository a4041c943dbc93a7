//! Call-site capture. The macros record `file!()`, `line!()` and the enclosing function.

#[doc(hidden)]
pub fn type_name_of<T>(_: T) -> &'static str {
    std::any::type_name::<T>()
}

/// Reduce the type name of a nested marker function to the name of its enclosing function.
#[doc(hidden)]
pub fn enclosing_function(marker: &'static str) -> &'static str {
    let mut path = marker.strip_suffix("::__marker").unwrap_or(marker);
    while let Some(outer) = path.strip_suffix("::{{closure}}") {
        path = outer;
    }
    path.rsplit("::").next().unwrap_or(path)
}

/// Name of the enclosing function.
#[macro_export]
macro_rules! function_name {
    () => {{
        fn __marker() {}
        $crate::macros::enclosing_function($crate::macros::type_name_of(__marker))
    }};
}

/// The current [`SourceLocation`](crate::SourceLocation).
#[macro_export]
macro_rules! location {
    () => {
        $crate::SourceLocation::new(file!(), $crate::function_name!(), line!())
    };
}

/// `track_new!(tracker, value)` moves `value` into a tracked scalar allocation.
#[macro_export]
macro_rules! track_new {
    ($tracker:expr, $value:expr) => {
        $tracker.new_object($crate::location!(), $value)
    };
}

/// `track_new_array!(tracker, value; len)` allocates a tracked array of `len` clones.
#[macro_export]
macro_rules! track_new_array {
    ($tracker:expr, $value:expr; $len:expr) => {
        $tracker.new_array($crate::location!(), $len, $value)
    };
}

/// Unsafe: see [`Tracker::delete_object`](crate::Tracker::delete_object).
#[macro_export]
macro_rules! track_delete {
    ($tracker:expr, $ptr:expr) => {
        $tracker.delete_object($crate::location!(), $ptr)
    };
}

/// Unsafe: see [`Tracker::delete_array`](crate::Tracker::delete_array).
#[macro_export]
macro_rules! track_delete_array {
    ($tracker:expr, $ptr:expr) => {
        $tracker.delete_array($crate::location!(), $ptr)
    };
}
