use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::controller::{
    FieldKey, FieldRuleFn, FormController, FormResult, read_lock, write_lock,
};

/// A user-displayable validation failure. Carried in field meta, never
/// propagated as `Err`.
pub trait ValidationError: Clone + Send + Sync + 'static {
    fn message(&self) -> Cow<'static, str>;
}

/// Typed accessor for one field of a form model. Implementations are
/// generated by `#[derive(FormModel)]`; the key returned by `key()` is the
/// field's name and doubles as the map key for all per-field bookkeeping.
pub trait FieldLens<T>: Copy + Send + Sync + 'static {
    type Value: Clone + PartialEq + Send + Sync + 'static;

    fn key(self) -> FieldKey;
    fn get<'a>(self, model: &'a T) -> &'a Self::Value;
    fn set(self, model: &mut T, value: Self::Value);
}

pub trait FormModel: Clone + Send + Sync + 'static {
    type Fields;

    fn fields() -> Self::Fields;

    /// Every field of the model, in declaration order. Fixes the field set
    /// the controller tracks from construction onward.
    fn field_keys() -> &'static [FieldKey];
}

/// A pure per-field rule. The whole model is passed alongside the value so
/// cross-field checks (confirm-password and the like) stay expressible.
pub trait FieldValidator<T, L, E>: Send + Sync
where
    L: FieldLens<T>,
    E: ValidationError,
{
    fn validate(&self, model: &T, value: &L::Value) -> Result<(), E>;
}

impl<T, L, E, F> FieldValidator<T, L, E> for F
where
    L: FieldLens<T>,
    E: ValidationError,
    F: for<'a> Fn(&'a T, &'a L::Value) -> Result<(), E> + Send + Sync,
{
    fn validate(&self, model: &T, value: &L::Value) -> Result<(), E> {
        (self)(model, value)
    }
}

impl<T, E> FormController<T, E>
where
    T: FormModel,
    E: ValidationError,
{
    /// Registers the rule for one field. A field holds at most one rule;
    /// registering again replaces the previous one. Fields without a rule
    /// are never validated and always pass.
    pub fn rule<L, V>(&self, lens: L, validator: V) -> FormResult<()>
    where
        L: FieldLens<T>,
        V: FieldValidator<T, L, E> + 'static,
    {
        let key = lens.key();
        let validator = Arc::new(validator);
        let wrapped: FieldRuleFn<T, E> =
            Arc::new(move |model: &T| validator.validate(model, lens.get(model)));
        let mut rules = write_lock(&self.rules, "registering field rule")?;
        rules.insert(key, wrapped);
        Ok(())
    }

    /// Validates one field against the current model value, recording the
    /// outcome in that field's meta. Other fields are untouched.
    pub fn validate_field<L>(&self, lens: L) -> FormResult<bool>
    where
        L: FieldLens<T>,
    {
        self.validate_field_by_key(lens.key())
    }

    /// Validates a candidate value that has not been written to the model,
    /// e.g. the raw content of an input control on blur. Records the outcome
    /// exactly like `validate_field`.
    pub fn validate_value<L>(&self, lens: L, candidate: &L::Value) -> FormResult<bool>
    where
        L: FieldLens<T>,
    {
        let key = lens.key();
        let model = {
            read_lock(&self.state, "reading model for candidate validation")?
                .model
                .clone()
        };
        let rule = {
            read_lock(&self.rules, "reading rule for candidate validation")?
                .get(&key)
                .cloned()
        };
        let error = match rule {
            Some(rule) => {
                let mut probe = model;
                lens.set(&mut probe, candidate.clone());
                rule(&probe).err()
            }
            None => None,
        };

        let mut state = write_lock(&self.state, "writing candidate validation result")?;
        let meta = state.ensure_meta(key);
        meta.error = error;
        Ok(meta.error.is_none())
    }

    /// Whole-form validation: marks every field touched, then recomputes
    /// every field's error from scratch. No incremental merge; a stale error
    /// on a field whose rule now passes (or that has no rule) disappears.
    pub fn validate_form(&self) -> FormResult<bool> {
        let model = {
            read_lock(&self.state, "reading model for form validation")?
                .model
                .clone()
        };
        let rules = read_lock(&self.rules, "reading rules for form validation")?.clone();

        let mut outcomes = BTreeMap::<FieldKey, E>::new();
        for (key, rule) in rules {
            if let Err(error) = rule(&model) {
                outcomes.insert(key, error);
            }
        }

        let all_valid = outcomes.is_empty();
        let mut state = write_lock(&self.state, "applying form validation result")?;
        for key in T::field_keys() {
            let meta = state.ensure_meta(*key);
            meta.touched = true;
            meta.error = outcomes.remove(key);
        }
        Ok(all_valid)
    }

    pub(crate) fn validate_field_by_key(&self, key: FieldKey) -> FormResult<bool> {
        let model = {
            read_lock(&self.state, "reading model for field validation")?
                .model
                .clone()
        };
        let rule = {
            read_lock(&self.rules, "reading rule for field validation")?
                .get(&key)
                .cloned()
        };
        let error = rule.and_then(|rule| rule(&model).err());

        let mut state = write_lock(&self.state, "writing field validation result")?;
        let meta = state.ensure_meta(key);
        meta.error = error;
        Ok(meta.error.is_none())
    }
}
