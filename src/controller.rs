use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::submit::SubmitHandler;
use crate::validation::{FormModel, ValidationError};

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

/// Identifies one field of a form model. Keys are produced by `FieldLens`
/// implementations (normally via `#[derive(FormModel)]`), so every key in
/// circulation names a real field of the model type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldKey(&'static str);

impl FieldKey {
    pub const fn new(value: &'static str) -> Self {
        Self(value)
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Generation token for one accepted submit attempt. A completion may only
/// end the lifecycle it started; after a mid-flight reset (and possibly a
/// newly accepted attempt) the stale completion's ticket no longer matches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SubmitTicket(u64);

impl SubmitTicket {
    fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitState {
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

/// Per-field bookkeeping. At most one rule may be registered per field, so a
/// field carries at most one error at a time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldMeta<E> {
    pub dirty: bool,
    pub touched: bool,
    pub error: Option<E>,
}

impl<E> Default for FieldMeta<E> {
    fn default() -> Self {
        Self {
            dirty: false,
            touched: false,
            error: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FormSnapshot<T, E> {
    pub model: T,
    pub submit_state: SubmitState,
    pub submit_count: u32,
    pub is_dirty: bool,
    pub is_valid: bool,
    pub field_meta: BTreeMap<FieldKey, FieldMeta<E>>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FormError {
    StatePoisoned(&'static str),
    InvalidStateTransition { from: SubmitState, to: SubmitState },
    AlreadySubmitting,
    DraftLoadFailed(String),
    DraftSaveFailed(String),
    DraftClearFailed(String),
}

impl Display for FormError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::StatePoisoned(context) => {
                write!(f, "form state lock poisoned while {context}")
            }
            FormError::InvalidStateTransition { from, to } => {
                write!(f, "invalid submit state transition: {from:?} -> {to:?}")
            }
            FormError::AlreadySubmitting => f.write_str("form submit is already in progress"),
            FormError::DraftLoadFailed(error) => write!(f, "failed to load draft: {error}"),
            FormError::DraftSaveFailed(error) => write!(f, "failed to save draft: {error}"),
            FormError::DraftClearFailed(error) => write!(f, "failed to clear draft: {error}"),
        }
    }
}

impl std::error::Error for FormError {}

pub type FormResult<T> = Result<T, FormError>;

pub(crate) type FieldRuleFn<T, E> = Arc<dyn Fn(&T) -> Result<(), E> + Send + Sync>;

pub(crate) struct FormState<T, E> {
    pub(crate) id: FormId,
    pub(crate) initial_model: T,
    pub(crate) model: T,
    pub(crate) submit_state: SubmitState,
    pub(crate) submit_count: u32,
    pub(crate) submit_ticket: SubmitTicket,
    pub(crate) dirty_fields: BTreeSet<FieldKey>,
    pub(crate) field_meta: BTreeMap<FieldKey, FieldMeta<E>>,
}

impl<T, E> FormState<T, E> {
    pub(crate) fn ensure_meta(&mut self, key: FieldKey) -> &mut FieldMeta<E> {
        self.field_meta.entry(key).or_default()
    }
}

/// Owns the authoritative copy of a form's values plus per-field touched,
/// dirty, and error bookkeeping, and drives the submit lifecycle. Cloning is
/// cheap and every clone observes the same underlying state, so UI glue can
/// hand a clone to each input's event hookup.
#[derive(Clone)]
pub struct FormController<T, E>
where
    T: FormModel,
    E: ValidationError,
{
    pub(crate) state: Arc<RwLock<FormState<T, E>>>,
    pub(crate) rules: Arc<RwLock<BTreeMap<FieldKey, FieldRuleFn<T, E>>>>,
    pub(crate) on_submit: Arc<dyn SubmitHandler<T>>,
}

impl<T, E> FormController<T, E>
where
    T: FormModel,
    E: ValidationError,
{
    /// `initial` fixes the field set for the lifetime of the controller;
    /// `on_submit` is the external collaborator invoked once per accepted
    /// submit attempt.
    pub fn new(initial: T, on_submit: impl SubmitHandler<T> + 'static) -> Self {
        let field_meta = T::field_keys()
            .iter()
            .map(|key| (*key, FieldMeta::default()))
            .collect();
        Self {
            state: Arc::new(RwLock::new(FormState {
                id: FormId::next(),
                initial_model: initial.clone(),
                model: initial,
                submit_state: SubmitState::Idle,
                submit_count: 0,
                submit_ticket: SubmitTicket(0),
                dirty_fields: BTreeSet::new(),
                field_meta,
            })),
            rules: Arc::new(RwLock::new(BTreeMap::new())),
            on_submit: Arc::new(on_submit),
        }
    }

    pub fn form_id(&self) -> FormResult<FormId> {
        Ok(read_lock(&self.state, "reading form id")?.id)
    }

    /// Interactive edit. Writes the value and refreshes the field's dirty
    /// flag; re-runs the field's rule only when the field has already been
    /// touched. Never marks the field touched itself.
    pub fn change<L>(&self, lens: L, value: L::Value) -> FormResult<()>
    where
        L: crate::validation::FieldLens<T>,
    {
        let key = lens.key();
        let touched = {
            let mut state = write_lock(&self.state, "writing changed field value")?;
            lens.set(&mut state.model, value);
            let is_dirty = lens.get(&state.model) != lens.get(&state.initial_model);
            if is_dirty {
                state.dirty_fields.insert(key);
            } else {
                state.dirty_fields.remove(&key);
            }
            let meta = state.ensure_meta(key);
            meta.dirty = is_dirty;
            meta.touched
        };

        if touched {
            let _ = self.validate_field_by_key(key)?;
        }
        Ok(())
    }

    /// Marks the field touched unconditionally, then validates its current
    /// value. Touched is sticky until a reset.
    pub fn blur<L>(&self, lens: L) -> FormResult<()>
    where
        L: crate::validation::FieldLens<T>,
    {
        let key = lens.key();
        {
            let mut state = write_lock(&self.state, "marking field touched")?;
            state.ensure_meta(key).touched = true;
        }
        let _ = self.validate_field_by_key(key)?;
        Ok(())
    }

    /// Programmatic overwrite of one field. Skips validation and touched
    /// tracking; dirty is still refreshed so snapshots stay truthful.
    pub fn set<L>(&self, lens: L, value: L::Value) -> FormResult<()>
    where
        L: crate::validation::FieldLens<T>,
    {
        let key = lens.key();
        let mut state = write_lock(&self.state, "setting field value")?;
        lens.set(&mut state.model, value);
        let is_dirty = lens.get(&state.model) != lens.get(&state.initial_model);
        if is_dirty {
            state.dirty_fields.insert(key);
        } else {
            state.dirty_fields.remove(&key);
        }
        state.ensure_meta(key).dirty = is_dirty;
        Ok(())
    }

    /// Programmatic overwrite of several fields at once, e.g. prefilling an
    /// edit form from a fetched record. Skips validation, touched, and dirty
    /// tracking entirely.
    pub fn set_many(&self, apply: impl FnOnce(&mut T)) -> FormResult<()> {
        let mut state = write_lock(&self.state, "applying bulk field update")?;
        apply(&mut state.model);
        Ok(())
    }

    /// Runs the full submit lifecycle: whole-form validation, then exactly
    /// one handler invocation on a stable clone of the model. Returns
    /// `Ok(false)` when validation rejected the attempt, `Ok(true)` when the
    /// handler ran (its own failure is logged and swallowed). A second call
    /// while a submit is in flight fails with `AlreadySubmitting`.
    pub async fn submit(&self) -> FormResult<bool> {
        {
            let mut state = write_lock(&self.state, "preparing submit")?;
            if state.submit_state == SubmitState::Submitting {
                return Err(FormError::AlreadySubmitting);
            }
            transition_submit_state(&mut state, SubmitState::Validating)?;
            state.submit_count = state.submit_count.saturating_add(1);
        }

        let is_valid = self.validate_form()?;
        if !is_valid {
            let mut state = write_lock(&self.state, "handling submit validation failure")?;
            transition_submit_state(&mut state, SubmitState::Failed)?;
            return Ok(false);
        }

        let (model, ticket) = {
            let mut state = write_lock(&self.state, "moving submit state to submitting")?;
            transition_submit_state(&mut state, SubmitState::Submitting)?;
            state.submit_ticket = state.submit_ticket.next();
            (state.model.clone(), state.submit_ticket)
        };
        let result = self.on_submit.call(model).await;

        let mut state = write_lock(&self.state, "completing submit")?;
        // A reset while the handler was in flight already moved the state
        // back to Idle, and any attempt accepted after that reset carries a
        // fresh ticket; a stale completion owns neither lifecycle.
        if state.submit_state == SubmitState::Submitting && state.submit_ticket == ticket {
            let next = if result.is_ok() {
                SubmitState::Succeeded
            } else {
                SubmitState::Failed
            };
            transition_submit_state(&mut state, next)?;
        }
        if let Err(error) = result {
            tracing::error!(form_id = state.id.0, %error, "form submit handler failed");
        }
        Ok(true)
    }

    /// Restores the initial values and clears all field bookkeeping. Forces
    /// the submit state back to `Idle` even while a submit is in flight; the
    /// pending handler keeps running against its captured model clone.
    pub fn reset_to_initial(&self) -> FormResult<()> {
        let mut state = write_lock(&self.state, "resetting form")?;
        state.model = state.initial_model.clone();
        state.submit_state = SubmitState::Idle;
        state.dirty_fields.clear();
        for meta in state.field_meta.values_mut() {
            meta.dirty = false;
            meta.touched = false;
            meta.error = None;
        }
        Ok(())
    }

    pub fn reset_field<L>(&self, lens: L) -> FormResult<()>
    where
        L: crate::validation::FieldLens<T>,
    {
        let key = lens.key();
        let mut state = write_lock(&self.state, "resetting field")?;
        let initial_value = lens.get(&state.initial_model).clone();
        lens.set(&mut state.model, initial_value);
        state.dirty_fields.remove(&key);
        let meta = state.ensure_meta(key);
        meta.dirty = false;
        meta.touched = false;
        meta.error = None;
        Ok(())
    }

    pub fn clear_errors(&self) -> FormResult<()> {
        let mut state = write_lock(&self.state, "clearing all field errors")?;
        for meta in state.field_meta.values_mut() {
            meta.error = None;
        }
        Ok(())
    }

    pub fn clear_field_error<L>(&self, lens: L) -> FormResult<()>
    where
        L: crate::validation::FieldLens<T>,
    {
        let mut state = write_lock(&self.state, "clearing field error")?;
        if let Some(meta) = state.field_meta.get_mut(&lens.key()) {
            meta.error = None;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> FormResult<FormSnapshot<T, E>> {
        let state = read_lock(&self.state, "creating form snapshot")?;
        let is_valid = state.field_meta.values().all(|meta| meta.error.is_none());
        Ok(FormSnapshot {
            model: state.model.clone(),
            submit_state: state.submit_state,
            submit_count: state.submit_count,
            is_dirty: !state.dirty_fields.is_empty(),
            is_valid,
            field_meta: state.field_meta.clone(),
        })
    }

    pub fn is_submitting(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading submit state")?.submit_state == SubmitState::Submitting)
    }

    pub fn field_meta<L>(&self, lens: L) -> FormResult<Option<FieldMeta<E>>>
    where
        L: crate::validation::FieldLens<T>,
    {
        Ok(read_lock(&self.state, "reading field meta")?
            .field_meta
            .get(&lens.key())
            .cloned())
    }

    /// Error message suitable for rendering next to the field. Hidden until
    /// the field has been touched or a submit attempt has occurred, so a
    /// half-filled form does not light up prematurely.
    pub fn field_error_for_display<L>(
        &self,
        lens: L,
    ) -> FormResult<Option<std::borrow::Cow<'static, str>>>
    where
        L: crate::validation::FieldLens<T>,
    {
        let state = read_lock(&self.state, "reading display error message")?;
        let Some(meta) = state.field_meta.get(&lens.key()) else {
            return Ok(None);
        };
        if !meta.touched && state.submit_count == 0 {
            return Ok(None);
        }
        Ok(meta.error.as_ref().map(ValidationError::message))
    }
}

pub(crate) fn transition_submit_state<T, E>(
    state: &mut FormState<T, E>,
    next: SubmitState,
) -> FormResult<()> {
    let current = state.submit_state;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (SubmitState::Idle, SubmitState::Validating)
            | (SubmitState::Validating, SubmitState::Submitting)
            | (SubmitState::Validating, SubmitState::Failed)
            | (SubmitState::Submitting, SubmitState::Succeeded)
            | (SubmitState::Submitting, SubmitState::Failed)
            | (SubmitState::Succeeded, SubmitState::Validating)
            | (SubmitState::Failed, SubmitState::Validating)
            | (_, SubmitState::Idle)
    );
    if !allowed {
        return Err(FormError::InvalidStateTransition {
            from: current,
            to: next,
        });
    }
    state.submit_state = next;
    Ok(())
}

pub(crate) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(crate) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}
