/// Calls a remote function with a plain argument list instead of a tuple.
///
/// Works with anything exposing `call(&str, impl Arguments)`, such as a
/// [`PeerConnection`](crate::PeerConnection) or a [`Caller`](crate::Caller).
///
/// ```ignore
/// call!(peer, "Test", 0.4f32, "string arg", bottle)?;
/// ```
#[macro_export]
macro_rules! call {
    ($target:expr, $name:expr $(, $arg:expr)* $(,)?) => {
        $target.call($name, ($($arg,)*))
    };
}

/// Binds several functions on one connection in a single statement.
///
/// ```ignore
/// bind! { peer,
///     "update" => |message: String| println!("{message}"),
///     "ping" => || (),
/// }
/// ```
#[macro_export]
macro_rules! bind {
    ($target:expr, $($name:expr => $handler:expr),+ $(,)?) => {
        $(
            $target.bind($name, $handler);
        )+
    };
}
