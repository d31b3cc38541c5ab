use std::future::Future;
use std::pin::Pin;

/// Failure reported by a submit handler. The controller logs it and swallows
/// it; surfacing submission failures to the user is the handler's own
/// responsibility.
pub type SubmitError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type BoxedSubmitFuture = Pin<Box<dyn Future<Output = Result<(), SubmitError>> + Send + 'static>>;

/// The external collaborator invoked with a stable clone of the model once
/// whole-form validation has passed. Exactly one invocation per accepted
/// submit attempt; no retry.
pub trait SubmitHandler<T>: Send + Sync {
    fn call(&self, model: T) -> BoxedSubmitFuture;
}

impl<T, F, Fut, Err> SubmitHandler<T> for F
where
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Err>> + Send + 'static,
    Err: Into<SubmitError> + 'static,
{
    fn call(&self, model: T) -> BoxedSubmitFuture {
        let fut = (self)(model);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}
