use std::fmt;

use serde_json::Value;

use crate::handle::{BridgeHandle, Generation};
use crate::registry::ModuleRegistry;

const FIELD_MODULE_IDS: usize = 0;
const FIELD_METHOD_IDS: usize = 1;
const FIELD_PARAMS: usize = 2;

/// One native call decoded from a batch entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    pub index: usize,
    pub module_id: usize,
    pub method_id: usize,
    pub params: Vec<Value>,
}

/// A whole response document could not be used; nothing in it was run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    NotAnArray,
    MissingField(usize),
    FieldNotAnArray(usize),
    LengthMismatch {
        module_ids: usize,
        method_ids: usize,
        params: usize,
    },
    StaleGeneration {
        batch: Generation,
        registry: Generation,
    },
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnArray => write!(f, "response document is not an array"),
            Self::MissingField(idx) => write!(f, "response document has no field {idx}"),
            Self::FieldNotAnArray(idx) => write!(f, "response field {idx} is not an array"),
            Self::LengthMismatch {
                module_ids,
                method_ids,
                params,
            } => write!(
                f,
                "response sequences differ in length: modules={module_ids} methods={method_ids} params={params}"
            ),
            Self::StaleGeneration { batch, registry } => write!(
                f,
                "batch from generation {batch} does not match registry generation {registry}"
            ),
        }
    }
}

impl std::error::Error for BatchError {}

/// Entries of one batch, decoded but not yet resolved.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallBatch {
    pub calls: Vec<PendingCall>,
    /// Entries dropped during decoding (non-integer IDs, non-array params).
    pub skipped: usize,
}

impl CallBatch {
    /// Decode a response document.
    ///
    /// `null` means the engine had nothing queued. Anything that is not three
    /// parallel arrays of equal length is rejected as a whole; a single entry
    /// with unusable IDs or params is skipped with a warning.
    pub fn decode(document: &Value) -> Result<Self, BatchError> {
        if document.is_null() {
            return Ok(Self::default());
        }
        let fields = document.as_array().ok_or(BatchError::NotAnArray)?;
        let field = |idx: usize| -> Result<&Vec<Value>, BatchError> {
            fields
                .get(idx)
                .ok_or(BatchError::MissingField(idx))?
                .as_array()
                .ok_or(BatchError::FieldNotAnArray(idx))
        };
        let module_ids = field(FIELD_MODULE_IDS)?;
        let method_ids = field(FIELD_METHOD_IDS)?;
        let params = field(FIELD_PARAMS)?;

        if module_ids.len() != method_ids.len() || module_ids.len() != params.len() {
            return Err(BatchError::LengthMismatch {
                module_ids: module_ids.len(),
                method_ids: method_ids.len(),
                params: params.len(),
            });
        }

        let mut batch = Self::default();
        for (index, ((module_id, method_id), params)) in module_ids
            .iter()
            .zip(method_ids)
            .zip(params)
            .enumerate()
        {
            let (Some(module_id), Some(method_id)) = (as_id(module_id), as_id(method_id)) else {
                tracing::warn!(index, %module_id, %method_id, "batch entry has non-integer ids");
                batch.skipped += 1;
                continue;
            };
            let Some(params) = params.as_array() else {
                tracing::warn!(index, module_id, method_id, "batch entry params are not an array");
                batch.skipped += 1;
                continue;
            };
            batch.calls.push(PendingCall {
                index,
                module_id,
                method_id,
                params: params.clone(),
            });
        }
        Ok(batch)
    }
}

fn as_id(value: &Value) -> Option<usize> {
    value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        })
        .and_then(|id| usize::try_from(id).ok())
}

/// Result of processing one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    pub invoked: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Routes decoded batches to the registry's method thunks.
pub struct ResultProcessor;

impl ResultProcessor {
    /// Decode `document` and invoke every resolvable call in array order.
    ///
    /// Unknown module or method IDs, arity mismatches and thunk errors are
    /// logged and skipped; later entries still run. A malformed document, or
    /// one produced for another generation than the registry's, runs nothing.
    pub fn process(
        registry: &ModuleRegistry,
        bridge: &BridgeHandle,
        document: &Value,
    ) -> Result<BatchOutcome, BatchError> {
        if bridge.generation() != registry.generation() {
            let err = BatchError::StaleGeneration {
                batch: bridge.generation(),
                registry: registry.generation(),
            };
            tracing::warn!(error = %err, "dropping batch");
            return Err(err);
        }

        let batch = match CallBatch::decode(document) {
            Ok(batch) => batch,
            Err(err) => {
                tracing::error!(
                    error = %err,
                    generation = registry.generation(),
                    "returned document from executor in unexpected form; batch dropped"
                );
                return Err(err);
            }
        };

        let mut outcome = BatchOutcome {
            skipped: batch.skipped,
            ..BatchOutcome::default()
        };
        for call in batch.calls {
            let Some(module) = registry.lookup(call.module_id) else {
                tracing::warn!(
                    index = call.index,
                    module_id = call.module_id,
                    generation = registry.generation(),
                    "could not find referenced module"
                );
                outcome.skipped += 1;
                continue;
            };
            let Some(method) = module.lookup_method(call.method_id) else {
                tracing::warn!(
                    index = call.index,
                    module = module.name(),
                    method_id = call.method_id,
                    "request for unsupported method"
                );
                outcome.skipped += 1;
                continue;
            };

            tracing::trace!(module = module.name(), method = method.name(), "invoking");
            match method.invoke(bridge, call.params) {
                Ok(()) => outcome.invoked += 1,
                Err(err) => {
                    tracing::warn!(
                        module = module.name(),
                        method = method.name(),
                        error = %err,
                        "native method failed"
                    );
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }
}
