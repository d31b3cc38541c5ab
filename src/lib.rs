//! Rendering-agnostic form state management.
//!
//! A [`FormController`] owns the authoritative copy of a form's values,
//! per-field error and touched bookkeeping, and the submit lifecycle. Field
//! access is typed: `#[derive(FormModel)]` generates one lens per struct
//! field, so there is no stringly-typed path that could name a field the
//! model does not have.

mod controller;
mod draft;
mod submit;
mod validation;


pub use controller::{
    FieldKey, FieldMeta, FormController, FormError, FormId, FormResult, FormSnapshot, SubmitState,
};
pub use draft::{FormDraftStore, InMemoryDraftStore};
pub use formkit_derive::FormModel;
pub use submit::{BoxedSubmitFuture, SubmitError, SubmitHandler};
pub use validation::{FieldLens, FieldValidator, FormModel, ValidationError};
