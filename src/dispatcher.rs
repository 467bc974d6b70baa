use crate::{
    envelope::{self, Blocks, DecodeError},
    types::{Argument, Reply},
};
use std::{collections::BTreeMap, fmt, marker::PhantomData, sync::Arc};
use thiserror::Error;
use tracing::{debug, trace};

/// A function that can be bound by name and invoked from envelope blocks.
///
/// Implemented for every `Fn(A0, .., An) -> R` with up to eight parameters,
/// where each parameter is an [`Argument`] and `R` is a [`Reply`]. Parameter
/// `i` is decoded from argument block `i`, one block at a time, before the
/// function is called.
pub trait Handler<Args>: Send + Sync + 'static {
    /// Number of argument blocks the handler consumes.
    fn arity(&self) -> usize;

    fn invoke(
        &self,
        blocks: &mut Blocks,
        origin: &str,
        output: Option<&mut String>,
    ) -> Result<(), DecodeError>;
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> Handler<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: Reply,
            $($arg: Argument,)*
        {
            fn arity(&self) -> usize {
                0 $(+ <$arg as Argument>::BLOCKS)*
            }

            #[allow(non_snake_case, unused_variables)]
            fn invoke(
                &self,
                blocks: &mut Blocks,
                origin: &str,
                output: Option<&mut String>,
            ) -> Result<(), DecodeError> {
                $(let $arg = <$arg as Argument>::extract(blocks, origin)?;)*
                let reply = (self)($($arg),*);
                if let Some(out) = output {
                    if let Some(text) = reply.render() {
                        *out = text;
                    }
                }
                Ok(())
            }
        }
    };
}

impl_handler!();
impl_handler!(A0);
impl_handler!(A0, A1);
impl_handler!(A0, A1, A2);
impl_handler!(A0, A1, A2, A3);
impl_handler!(A0, A1, A2, A3, A4);
impl_handler!(A0, A1, A2, A3, A4, A5);
impl_handler!(A0, A1, A2, A3, A4, A5, A6);
impl_handler!(A0, A1, A2, A3, A4, A5, A6, A7);

/// A type-erased version of [`Handler`].
trait DynamicHandler: Send + Sync {
    fn arity(&self) -> usize;
    fn invoke(
        &self,
        blocks: &mut Blocks,
        origin: &str,
        output: Option<&mut String>,
    ) -> Result<(), DecodeError>;
}

struct TypedHandler<H, Args> {
    handler: H,
    _args: PhantomData<fn(Args)>,
}

impl<H, Args> DynamicHandler for TypedHandler<H, Args>
where
    H: Handler<Args>,
    Args: 'static,
{
    fn arity(&self) -> usize {
        self.handler.arity()
    }

    fn invoke(
        &self,
        blocks: &mut Blocks,
        origin: &str,
        output: Option<&mut String>,
    ) -> Result<(), DecodeError> {
        self.handler.invoke(blocks, origin, output)
    }
}

/// A shared reference to one bound handler.
///
/// Cloning is cheap; holding one does not keep the [`Registry`] borrowed.
#[derive(Clone)]
pub struct BoundHandler {
    name: Arc<str>,
    handler: Arc<dyn DynamicHandler>,
}

impl BoundHandler {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.handler.arity()
    }

    /// Decodes the argument blocks and calls the handler.
    pub fn invoke(
        &self,
        blocks: &mut Blocks,
        origin: &str,
        output: Option<&mut String>,
    ) -> Result<(), DispatchError> {
        self.handler
            .invoke(blocks, origin, output)
            .map_err(|source| DispatchError::Arguments {
                name: self.name.to_string(),
                source,
            })?;
        if blocks.remaining() > 0 {
            trace!(
                name = %self.name,
                extra = blocks.remaining(),
                "ignoring surplus argument blocks"
            );
        }
        Ok(())
    }
}

impl fmt::Debug for BoundHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundHandler")
            .field("name", &self.name)
            .field("arity", &self.arity())
            .finish()
    }
}

/// Maps function names to bound handlers.
///
/// Functions are registered with [`bind`](Self::bind) and invoked with
/// [`dispatch`](Self::dispatch). Binding a name twice replaces the earlier
/// handler.
#[derive(Default)]
pub struct Registry {
    handlers: BTreeMap<String, BoundHandler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind<Args, H>(&mut self, name: &str, handler: H)
    where
        H: Handler<Args>,
        Args: 'static,
    {
        let bound = BoundHandler {
            name: Arc::from(name),
            handler: Arc::new(TypedHandler {
                handler,
                _args: PhantomData,
            }),
        };
        debug!(name, arity = bound.arity(), "binding function");
        if self.handlers.insert(name.to_owned(), bound).is_some() {
            debug!(name, "replaced previously bound function");
        }
    }

    pub fn get(&self, name: &str) -> Option<BoundHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Bound function names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn functions(&self) -> Vec<FunctionInfo> {
        self.handlers
            .values()
            .map(|bound| FunctionInfo {
                name: bound.name().to_owned(),
                arity: bound.arity(),
            })
            .collect()
    }

    /// Pops the function name off `blocks` and returns the handler bound
    /// under it, or `None` on a lookup miss.
    ///
    /// The returned handler is independent of `self`, so callers holding the
    /// registry behind a lock can release it before invoking.
    pub fn lookup(
        &self,
        blocks: &mut Blocks,
        origin: &str,
    ) -> Result<Option<BoundHandler>, DecodeError> {
        let name = blocks.pop_name()?;
        let bound = self.get(&name);
        match &bound {
            Some(_) => trace!(%name, origin, "dispatching"),
            None => trace!(%name, origin, "no function bound under name"),
        }
        Ok(bound)
    }

    /// Pops the function name off `blocks` and invokes the matching handler.
    ///
    /// Returns `Ok(false)` if no handler is bound under that name. The
    /// handler's reply is rendered into `output` only when one is given.
    pub fn dispatch(
        &self,
        mut blocks: Blocks,
        origin: &str,
        output: Option<&mut String>,
    ) -> Result<bool, DispatchError> {
        match self.lookup(&mut blocks, origin)? {
            Some(bound) => {
                bound.invoke(&mut blocks, origin, output)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Decodes a raw transport payload and dispatches it, discarding any reply.
    pub fn dispatch_payload(&self, payload: &[u8], origin: &str) -> Result<bool, DispatchError> {
        self.dispatch(envelope::decode(payload)?, origin, None)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("functions", &self.handlers.keys())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub arity: usize,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("decoding envelope: {0}")]
    Decode(#[from] DecodeError),

    #[error("calling {name}: {source}")]
    Arguments {
        name: String,
        #[source]
        source: DecodeError,
    },
}
