use crate::envelope::{encode_block, Block, Blocks, DecodeError, EncodeError};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// An ordered argument list that can be packed into envelope blocks.
///
/// Implemented for tuples of up to eight [`Serialize`] values; `()` is the
/// empty argument list.
pub trait Arguments {
    const LEN: usize;

    fn encode_blocks(&self, blocks: &mut Vec<Block>) -> Result<(), EncodeError>;
}

macro_rules! impl_arguments {
    ($len:expr; $($arg:ident $idx:tt),*) => {
        impl<$($arg: Serialize),*> Arguments for ($($arg,)*) {
            const LEN: usize = $len;

            #[allow(unused_variables)]
            fn encode_blocks(&self, blocks: &mut Vec<Block>) -> Result<(), EncodeError> {
                $(
                    let block = encode_block(&self.$idx)
                        .map_err(|source| EncodeError::Argument { index: $idx, source })?;
                    blocks.push(block);
                )*
                Ok(())
            }
        }
    };
}

impl_arguments!(0;);
impl_arguments!(1; A0 0);
impl_arguments!(2; A0 0, A1 1);
impl_arguments!(3; A0 0, A1 1, A2 2);
impl_arguments!(4; A0 0, A1 1, A2 2, A3 3);
impl_arguments!(5; A0 0, A1 1, A2 2, A3 3, A4 4);
impl_arguments!(6; A0 0, A1 1, A2 2, A3 3, A4 4, A5 5);
impl_arguments!(7; A0 0, A1 1, A2 2, A3 3, A4 4, A5 5, A6 6);
impl_arguments!(8; A0 0, A1 1, A2 2, A3 3, A4 4, A5 5, A6 6, A7 7);

/// A handler parameter that can be produced from an inbound envelope.
///
/// Every [`DeserializeOwned`] type decodes the next argument block.
/// [`Origin`] consumes no block.
pub trait Argument: Sized {
    /// Number of blocks this parameter consumes.
    const BLOCKS: usize;

    fn extract(blocks: &mut Blocks, origin: &str) -> Result<Self, DecodeError>;
}

impl<T: DeserializeOwned> Argument for T {
    const BLOCKS: usize = 1;

    fn extract(blocks: &mut Blocks, _origin: &str) -> Result<Self, DecodeError> {
        blocks.decode_next()
    }
}

/// The topic an envelope arrived on.
///
/// Take it as a handler parameter to find out which logical sender issued
/// the call, e.g. when several connections share one inbound topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(pub String);

impl Origin {
    pub fn topic(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Argument for Origin {
    const BLOCKS: usize = 0;

    fn extract(_blocks: &mut Blocks, origin: &str) -> Result<Self, DecodeError> {
        Ok(Origin(origin.to_owned()))
    }
}

/// The value a bound handler returns.
///
/// Dispatch discards it unless the caller asks for an output slot, in which
/// case [`render`](Self::render) supplies its textual form.
///
/// Implemented for `()`, strings, primitives, [`Origin`], and `Option`/`Result`
/// of any `Reply`. To return another type, either implement `Reply` for it
/// or wrap the value in [`Displayed`] (any `Display` type) or [`Debugged`]
/// (any `Debug` type, such as a `Vec`):
///
/// ```
/// use topicrpc::{types::Debugged, Registry};
///
/// let mut registry = Registry::new();
/// registry.bind("evens", |n: u32| Debugged((0..n).step_by(2).collect::<Vec<_>>()));
/// ```
pub trait Reply {
    fn render(self) -> Option<String>;
}

impl Reply for () {
    fn render(self) -> Option<String> {
        None
    }
}

impl<T: Reply> Reply for Option<T> {
    fn render(self) -> Option<String> {
        self.and_then(Reply::render)
    }
}

impl<T: Reply, E: fmt::Display> Reply for Result<T, E> {
    fn render(self) -> Option<String> {
        match self {
            Ok(value) => value.render(),
            Err(err) => Some(err.to_string()),
        }
    }
}

macro_rules! impl_reply_display {
    ($($rust_type:ty),* $(,)?) => {
        $(
            impl Reply for $rust_type {
                fn render(self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

/// Renders the wrapped value with its `Display` impl.
#[derive(Debug, Clone, PartialEq)]
pub struct Displayed<T>(pub T);

impl<T: fmt::Display> Reply for Displayed<T> {
    fn render(self) -> Option<String> {
        Some(self.0.to_string())
    }
}

/// Renders the wrapped value with its `Debug` impl.
#[derive(Debug, Clone, PartialEq)]
pub struct Debugged<T>(pub T);

impl<T: fmt::Debug> Reply for Debugged<T> {
    fn render(self) -> Option<String> {
        Some(format!("{:?}", self.0))
    }
}

impl_reply_display!(
    Origin, String, &'static str, bool, char,
    i8, i16, i32, i64, i128, isize,
    u8, u16, u32, u64, u128, usize,
    f32, f64,
);
