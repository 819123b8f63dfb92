//! # Callables
//!
//! A `Callable` is a type-erased unit of work: it reads its arguments from a
//! `Decoder`, runs, and writes its return value into an `Encoder`.
//!
//! Typed Rust functions become callables through four wrappers:
//!
//! | wrapper                      | wraps                                 |
//! |------------------------------|---------------------------------------|
//! | `Function::new`              | `Fn(A1, .., An) -> Out`               |
//! | `Function::with_context`     | `Fn(&CallContext, A1, .., An) -> Out` |
//! | `ClassMember::new`           | `Fn(&T, A1, .., An) -> Out`           |
//! | `ClassMember::with_context`  | `Fn(&T, &CallContext, A1, .., An) -> Out` |
//!
//! Arguments are peeled off the decoder in declared order (up to eight).
//! Bytes left over once every argument is read are a `BadArguments` error;
//! too few bytes are a `Serialization` error.

use std::marker::PhantomData;
use std::sync::Arc;

use fetchpack::Bytes;
use fetchpack::Decoder;
use fetchpack::Encoder;
use fetchpack::Pack;
use fetchpack::Unpack;

use crate::Address;
use crate::ConnectionHandle;
use crate::error::ErrorCode;
use crate::error::ServiceError;

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub handle: ConnectionHandle,
    pub peer: Address,
}

impl CallContext {
    pub fn new(handle: ConnectionHandle, peer: Address) -> Self {
        Self { handle, peer }
    }
}

/// A type-erased invocable unit.
pub trait Callable: Send + Sync {
    fn invoke(
        &self,
        ctx: &CallContext,
        result: &mut Encoder,
        args: &mut Decoder<'_>,
    ) -> Result<(), ServiceError>;
}

// ============================================================================
//  RETURN VALUES
// ============================================================================

/// A value a callable can hand back to its caller.
pub trait Outcome {
    fn write(self, enc: &mut Encoder) -> Result<(), ServiceError>;
}

/// A void return still produces a reply: a single zero byte.
impl Outcome for () {
    fn write(self, enc: &mut Encoder) -> Result<(), ServiceError> {
        enc.u8(0);
        Ok(())
    }
}

/// `Err` becomes an error reply instead of a value.
impl<T: Outcome> Outcome for Result<T, ServiceError> {
    fn write(self, enc: &mut Encoder) -> Result<(), ServiceError> {
        self?.write(enc)
    }
}

/// Wraps any `Pack` type that has no `Outcome` impl of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packed<T>(pub T);

impl<T: Pack> Outcome for Packed<T> {
    fn write(self, enc: &mut Encoder) -> Result<(), ServiceError> {
        Ok(enc.pack(&self.0)?)
    }
}

macro_rules! outcome {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Outcome for $ty {
                fn write(self, enc: &mut Encoder) -> Result<(), ServiceError> {
                    Ok(enc.pack(&self)?)
                }
            }
        )*
    };
}

outcome!(bool, u8, i8, u16, i16, u32, i32, u64, i64, f32, f64, char, String, Bytes);

impl Outcome for &str {
    fn write(self, enc: &mut Encoder) -> Result<(), ServiceError> {
        Ok(enc.str(self)?)
    }
}

impl<T: Pack> Outcome for Vec<T> {
    fn write(self, enc: &mut Encoder) -> Result<(), ServiceError> {
        Ok(enc.pack(&self)?)
    }
}

impl<T: Pack> Outcome for Option<T> {
    fn write(self, enc: &mut Encoder) -> Result<(), ServiceError> {
        Ok(enc.pack(&self)?)
    }
}

macro_rules! outcome_tuple {
    ($($name:ident),+) => {
        impl<$($name: Pack),+> Outcome for ($($name,)+) {
            fn write(self, enc: &mut Encoder) -> Result<(), ServiceError> {
                Ok(enc.pack(&self)?)
            }
        }
    };
}

outcome_tuple!(A1);
outcome_tuple!(A1, A2);
outcome_tuple!(A1, A2, A3);
outcome_tuple!(A1, A2, A3, A4);
outcome_tuple!(A1, A2, A3, A4, A5);
outcome_tuple!(A1, A2, A3, A4, A5, A6);
outcome_tuple!(A1, A2, A3, A4, A5, A6, A7);
outcome_tuple!(A1, A2, A3, A4, A5, A6, A7, A8);

// ============================================================================
//  HANDLER SHAPES
// ============================================================================

/// `Fn(A1, .., An) -> Out`, with `Args = (A1, .., An)`.
pub trait Handler<Args, Out>: Send + Sync + 'static {
    fn invoke(&self, args: Args) -> Out;
}

/// `Fn(&CallContext, A1, .., An) -> Out`.
pub trait ContextHandler<Args, Out>: Send + Sync + 'static {
    fn invoke(&self, ctx: &CallContext, args: Args) -> Out;
}

/// `Fn(&T, A1, .., An) -> Out`, typically a method path like `Store::get`.
pub trait MemberHandler<T, Args, Out>: Send + Sync + 'static {
    fn invoke(&self, target: &T, args: Args) -> Out;
}

/// `Fn(&T, &CallContext, A1, .., An) -> Out`.
pub trait ContextMemberHandler<T, Args, Out>: Send + Sync + 'static {
    fn invoke(&self, target: &T, ctx: &CallContext, args: Args) -> Out;
}

macro_rules! handlers {
    ($($arg:ident),*) => {
        impl<Func, Out, $($arg,)*> Handler<($($arg,)*), Out> for Func
        where
            Func: Fn($($arg),*) -> Out + Send + Sync + 'static,
        {
            #[allow(non_snake_case)]
            fn invoke(&self, ($($arg,)*): ($($arg,)*)) -> Out {
                (self)($($arg),*)
            }
        }

        impl<Func, Out, $($arg,)*> ContextHandler<($($arg,)*), Out> for Func
        where
            Func: Fn(&CallContext, $($arg),*) -> Out + Send + Sync + 'static,
        {
            #[allow(non_snake_case)]
            fn invoke(&self, ctx: &CallContext, ($($arg,)*): ($($arg,)*)) -> Out {
                (self)(ctx, $($arg),*)
            }
        }

        impl<Func, T, Out, $($arg,)*> MemberHandler<T, ($($arg,)*), Out> for Func
        where
            Func: Fn(&T, $($arg),*) -> Out + Send + Sync + 'static,
        {
            #[allow(non_snake_case)]
            fn invoke(&self, target: &T, ($($arg,)*): ($($arg,)*)) -> Out {
                (self)(target, $($arg),*)
            }
        }

        impl<Func, T, Out, $($arg,)*> ContextMemberHandler<T, ($($arg,)*), Out> for Func
        where
            Func: Fn(&T, &CallContext, $($arg),*) -> Out + Send + Sync + 'static,
        {
            #[allow(non_snake_case)]
            fn invoke(&self, target: &T, ctx: &CallContext, ($($arg,)*): ($($arg,)*)) -> Out {
                (self)(target, ctx, $($arg),*)
            }
        }
    };
}

handlers!();
handlers!(A1);
handlers!(A1, A2);
handlers!(A1, A2, A3);
handlers!(A1, A2, A3, A4);
handlers!(A1, A2, A3, A4, A5);
handlers!(A1, A2, A3, A4, A5, A6);
handlers!(A1, A2, A3, A4, A5, A6, A7);
handlers!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Reads the full argument list and rejects anything left over.
fn unroll<Args: Unpack>(args: &mut Decoder<'_>) -> Result<Args, ServiceError> {
    let unpacked = Args::unpack(args)?;
    if args.remaining() != 0 {
        return Err(ServiceError::new(
            ErrorCode::BadArguments,
            format!("{} unexpected bytes after the last argument", args.remaining()),
        ));
    }
    Ok(unpacked)
}

// ============================================================================
//  WRAPPERS
// ============================================================================

/// Marker: the wrapped function does not see the call context.
pub struct Plain;

/// Marker: the wrapped function receives `&CallContext` first.
pub struct Contextual;

/// A free function exposed as a `Callable`.
pub struct Function<F, Args, Out, K = Plain> {
    f: F,
    _marker: PhantomData<fn(Args, K) -> Out>,
}

impl<F, Args, Out> Function<F, Args, Out, Plain>
where
    F: Handler<Args, Out>,
{
    pub fn new(f: F) -> Self {
        Self { f, _marker: PhantomData }
    }
}

impl<F, Args, Out> Function<F, Args, Out, Contextual>
where
    F: ContextHandler<Args, Out>,
{
    pub fn with_context(f: F) -> Self {
        Self { f, _marker: PhantomData }
    }
}

impl<F, Args, Out> Callable for Function<F, Args, Out, Plain>
where
    F: Handler<Args, Out>,
    Args: Unpack + 'static,
    Out: Outcome + 'static,
{
    fn invoke(&self, _ctx: &CallContext, result: &mut Encoder, args: &mut Decoder<'_>) -> Result<(), ServiceError> {
        let args = unroll::<Args>(args)?;
        Handler::invoke(&self.f, args).write(result)
    }
}

impl<F, Args, Out> Callable for Function<F, Args, Out, Contextual>
where
    F: ContextHandler<Args, Out>,
    Args: Unpack + 'static,
    Out: Outcome + 'static,
{
    fn invoke(&self, ctx: &CallContext, result: &mut Encoder, args: &mut Decoder<'_>) -> Result<(), ServiceError> {
        let args = unroll::<Args>(args)?;
        ContextHandler::invoke(&self.f, ctx, args).write(result)
    }
}

/// A method bound to a shared instance, exposed as a `Callable`.
pub struct ClassMember<T, M, Args, Out, K = Plain> {
    target: Arc<T>,
    method: M,
    _marker: PhantomData<fn(Args, K) -> Out>,
}

impl<T, M, Args, Out> ClassMember<T, M, Args, Out, Plain>
where
    M: MemberHandler<T, Args, Out>,
{
    pub fn new(target: Arc<T>, method: M) -> Self {
        Self { target, method, _marker: PhantomData }
    }
}

impl<T, M, Args, Out> ClassMember<T, M, Args, Out, Contextual>
where
    M: ContextMemberHandler<T, Args, Out>,
{
    pub fn with_context(target: Arc<T>, method: M) -> Self {
        Self { target, method, _marker: PhantomData }
    }
}

impl<T, M, Args, Out> Callable for ClassMember<T, M, Args, Out, Plain>
where
    T: Send + Sync + 'static,
    M: MemberHandler<T, Args, Out>,
    Args: Unpack + 'static,
    Out: Outcome + 'static,
{
    fn invoke(&self, _ctx: &CallContext, result: &mut Encoder, args: &mut Decoder<'_>) -> Result<(), ServiceError> {
        let args = unroll::<Args>(args)?;
        MemberHandler::invoke(&self.method, &self.target, args).write(result)
    }
}

impl<T, M, Args, Out> Callable for ClassMember<T, M, Args, Out, Contextual>
where
    T: Send + Sync + 'static,
    M: ContextMemberHandler<T, Args, Out>,
    Args: Unpack + 'static,
    Out: Outcome + 'static,
{
    fn invoke(&self, ctx: &CallContext, result: &mut Encoder, args: &mut Decoder<'_>) -> Result<(), ServiceError> {
        let args = unroll::<Args>(args)?;
        ContextMemberHandler::invoke(&self.method, &self.target, ctx, args).write(result)
    }
}
