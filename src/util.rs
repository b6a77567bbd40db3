/// Simple macro to prevent boilerplate of `.to_owned()`
///
/// The macro returns a `String` from the given `&str` value. It removes the boilerplate
/// that normally exists because of various `.to_owned()` calls.
#[macro_export]
macro_rules! str {
    ($a:expr) => {
        $a.to_owned()
    };
}

/// Trait providing the `panic()` method that calls the given function and panics with the returned
/// message
///
/// This trait exists to provide the same as `expect()` but with the advantage that you have the
/// error available to include the error into the panic message. Only meant for the binary where a
/// failure leaves nothing to serve.
pub trait Expect<F: FnOnce(Self::Error) -> String> {
    type Value;
    type Error;

    fn panic(self, f: F) -> Self::Value;
}

/// Generic implementation of Expect for any Result type
impl<T, E, F: FnOnce(E) -> String> Expect<F> for Result<T, E> {
    type Value = T;
    type Error = E;
    fn panic(self, f: F) -> Self::Value {
        match self {
            Ok(v) => v,
            Err(e) => panic!("{}", f(e)),
        }
    }
}

/// Format a list of register values as hex the way requests are logged
pub fn to_hex_str(values: &[u16]) -> String {
    let mut s = str!("[ ");
    for (i, v) in values.iter().enumerate() {
        if i == values.len() - 1 {
            s += &format!("{:#06X} ", v);
        } else {
            s += &format!("{:#06X}, ", v);
        }
    }
    s + "]"
}
