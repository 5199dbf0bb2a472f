//! Pseudo-register calculation.
//!
//! A pseudo-register may carry a `formula` over decoded wire registers, each
//! available as `r<address>` (for example `r11016 - r11000`). Formulas are
//! evaluated after a read cycle against its [`Readings`].

use crate::loader::RegisterMap;
use crate::types::{DecodedRecord, Readings, RegisterKey, RegisterValue};
use evalexpr::*;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalcError {
    #[error("register {0} is not available")]
    MissingRegister(String),
    #[error("formula error: {0}")]
    Formula(String),
    #[error("formula produced a non-finite result")]
    NotFinite,
}

impl From<EvalexprError> for CalcError {
    fn from(e: EvalexprError) -> Self {
        match e {
            EvalexprError::VariableIdentifierNotFound(id) => CalcError::MissingRegister(id),
            other => CalcError::Formula(other.to_string()),
        }
    }
}

/// Numeric readings as formula variables. Text values are left out, so a
/// formula naming one fails as a missing register.
fn context_for(readings: &Readings) -> Result<HashMapContext, CalcError> {
    let mut ctx = HashMapContext::new();
    for (addr, rec) in readings {
        if let Some(v) = rec.value.as_f64() {
            ctx.set_value(format!("r{addr}"), Value::Float(v))?;
        }
    }
    Ok(ctx)
}

fn eval_in(formula: &str, ctx: &HashMapContext) -> Result<f64, CalcError> {
    let tree = build_operator_tree(formula)?;
    let v = tree.eval_number_with_context(ctx)?;
    if !v.is_finite() {
        return Err(CalcError::NotFinite);
    }
    // Small negative artefacts show up around zero flow; never report them.
    Ok(v.max(0.0))
}

/// Evaluate one formula against a read result. Negative results are clamped to zero.
pub fn evaluate_formula(formula: &str, readings: &Readings) -> Result<f64, CalcError> {
    eval_in(formula, &context_for(readings)?)
}

/// Evaluate the pseudo-registers among `keys`, keyed by pseudo-register key.
///
/// Wire keys are ignored. A pseudo-register whose formula cannot be evaluated
/// is logged and left out.
pub fn evaluate(
    map: &RegisterMap,
    keys: &[RegisterKey],
    readings: &Readings,
) -> BTreeMap<String, DecodedRecord> {
    let mut out = BTreeMap::new();
    let ctx = match context_for(readings) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "building formula context");
            return out;
        }
    };
    for key in keys {
        let RegisterKey::Pseudo(k) = key else {
            continue;
        };
        let Some(pseudo) = map.pseudo(k) else {
            tracing::debug!(register = %k, "not a pseudo-register");
            continue;
        };
        let Some(formula) = pseudo.formula.as_deref() else {
            tracing::debug!(register = %k, "pseudo-register has no formula");
            continue;
        };
        match eval_in(formula, &ctx) {
            Ok(v) => {
                out.insert(
                    k.clone(),
                    DecodedRecord {
                        name: pseudo.name.clone(),
                        value: RegisterValue::Float(v),
                        unit: pseudo.unit.clone(),
                    },
                );
            }
            Err(e) => tracing::warn!(register = %k, formula, error = %e, "calculation skipped"),
        }
    }
    out
}
