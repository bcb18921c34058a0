//! Callable property values and the receiver they run against.

use crate::error::{Error, Result};
use crate::object::Instance;
use crate::value::Value;
use futures::future::{FutureExt, LocalBoxFuture};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

type SyncBody = dyn Fn(Invocation) -> Result<Value>;
type AsyncBody = dyn Fn(Invocation) -> LocalBoxFuture<'static, Result<Value>>;

/// A function contributed by a pattern or idea. Cloning shares the body;
/// equality is identity.
#[derive(Clone)]
pub enum Function {
    Sync(Rc<SyncBody>),
    Async(Rc<AsyncBody>),
}

impl Function {
    pub fn new(body: impl Fn(Invocation) -> Result<Value> + 'static) -> Self {
        Self::Sync(Rc::new(body))
    }

    pub fn new_async<F, Fut>(body: F) -> Self
    where
        F: Fn(Invocation) -> Fut + 'static,
        Fut: Future<Output = Result<Value>> + 'static,
    {
        Self::Async(Rc::new(move |inv| body(inv).boxed_local()))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        match (self, other) {
            (Self::Sync(a), Self::Sync(b)) => {
                Rc::as_ptr(a) as *const u8 == Rc::as_ptr(b) as *const u8
            }
            (Self::Async(a), Self::Async(b)) => {
                Rc::as_ptr(a) as *const u8 == Rc::as_ptr(b) as *const u8
            }
            _ => false,
        }
    }

    /// Call synchronously. Async bodies cannot be driven here.
    pub fn call(&self, inv: Invocation) -> Result<Value> {
        match self {
            Self::Sync(body) => body(inv),
            Self::Async(_) => Err(Error::AsyncRequired(inv.method)),
        }
    }

    pub async fn call_async(&self, inv: Invocation) -> Result<Value> {
        match self {
            Self::Sync(body) => body(inv),
            Self::Async(body) => body(inv).await,
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => write!(f, "fn"),
            Self::Async(_) => write!(f, "async fn"),
        }
    }
}

/// Receiver and arguments for one function call.
#[derive(Clone)]
pub struct Invocation {
    pub this: Instance,
    pub args: Vec<Value>,
    /// Property name the function was reached through.
    pub method: String,
    /// Pattern that contributed the running function, if known. Super calls
    /// continue upward from here.
    pub origin: Option<String>,
}

impl Invocation {
    pub fn new(this: Instance, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            this,
            args,
            method: method.into(),
            origin: None,
        }
    }

    pub(crate) fn from_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }

    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }

    /// Call the nearest ancestor's version of the running method.
    pub fn call_super(&self, args: Vec<Value>) -> Result<Value> {
        self.this.super_call(self.origin.as_deref(), &self.method, args)
    }

    pub async fn call_super_async(&self, args: Vec<Value>) -> Result<Value> {
        self.this
            .super_call_async(self.origin.as_deref(), &self.method, args)
            .await
    }
}
