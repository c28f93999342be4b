//! Material ledger: all-or-nothing batch withdrawals from shared stock.
//!
//! Withdrawal is two-phase. Every requested line is validated against
//! current stock first; if any line fails, the caller gets the complete
//! list of failing lines and nothing is decremented. Only a fully valid
//! batch mutates stock, as one logical transaction, and the resulting
//! withdrawal records are attached to the task that consumed them.

use crate::events::{DomainEvent, EventKind, Mutation};
use crate::store::{Store, StoreError};
use crate::types::{ActivityEntry, ActivityKind, Actor, Material, MaterialWithdrawal};
use chrono::Utc;
use eyre::{Context, Result};
use std::collections::HashMap;

/// One requested withdrawal line.
#[derive(Debug, Clone)]
pub struct WithdrawalRequest {
    pub material_id: String,
    pub quantity: i64,
}

impl WithdrawalRequest {
    pub fn new(material_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            material_id: material_id.into(),
            quantity,
        }
    }
}

/// Why a single line was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum LineError {
    /// Material id does not exist in the catalog.
    NotFound { material_id: String },
    /// Quantity below the minimum of one unit.
    InvalidQuantity { material_id: String, quantity: i64 },
    /// Requested more than is on hand (duplicate lines count summed).
    InsufficientStock {
        material_id: String,
        requested: i64,
        available: i64,
    },
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineError::NotFound { material_id } => {
                write!(f, "material not found: {}", material_id)
            }
            LineError::InvalidQuantity { material_id, quantity } => {
                write!(f, "invalid quantity {} for {}", quantity, material_id)
            }
            LineError::InsufficientStock {
                material_id,
                requested,
                available,
            } => write!(
                f,
                "insufficient stock for {}: requested {}, available {}",
                material_id, requested, available
            ),
        }
    }
}

/// Batch refusal carrying every failing line, so the caller can present
/// all problems at once.
#[derive(Debug)]
pub struct LedgerError {
    pub lines: Vec<LineError>,
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} withdrawal line(s) refused: ", self.lines.len())?;
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", line)?;
        }
        Ok(())
    }
}

impl std::error::Error for LedgerError {}

/// Stock operations on the store.
pub trait StoreLedgerExt {
    /// Withdraw a batch of materials for a task. All-or-nothing: on any
    /// failing line, stock is untouched and the error lists every
    /// failure. On success each line's records are attached to the task.
    fn withdraw(
        &mut self,
        job_id: &str,
        task_id: &str,
        requests: &[WithdrawalRequest],
        actor: &Actor,
    ) -> Result<Mutation<Vec<MaterialWithdrawal>>>;
}

impl StoreLedgerExt for Store {
    fn withdraw(
        &mut self,
        job_id: &str,
        task_id: &str,
        requests: &[WithdrawalRequest],
        actor: &Actor,
    ) -> Result<Mutation<Vec<MaterialWithdrawal>>> {
        let mut job = self.load_job(job_id)?;
        self.require_acknowledged(&job)?;

        let task_pos = job.task_position(task_id).ok_or_else(|| {
            eyre::eyre!(StoreError::TaskNotFound {
                job_id: job_id.to_string(),
                task_id: task_id.to_string(),
            })
        })?;

        // Phase one: validate every line, collecting all failures
        let mut errors: Vec<LineError> = Vec::new();
        let mut catalog: HashMap<String, Material> = HashMap::new();
        let mut requested_totals: HashMap<String, i64> = HashMap::new();

        for request in requests {
            if request.quantity < 1 {
                errors.push(LineError::InvalidQuantity {
                    material_id: request.material_id.clone(),
                    quantity: request.quantity,
                });
                continue;
            }

            if !catalog.contains_key(&request.material_id) {
                match self.get_material(&request.material_id)? {
                    Some(material) => {
                        catalog.insert(request.material_id.clone(), material);
                    }
                    None => {
                        errors.push(LineError::NotFound {
                            material_id: request.material_id.clone(),
                        });
                        continue;
                    }
                }
            }

            *requested_totals
                .entry(request.material_id.clone())
                .or_insert(0) += request.quantity;
        }

        // Stock check runs on per-material sums so duplicate lines
        // cannot jointly oversell
        for (material_id, requested) in &requested_totals {
            let material = &catalog[material_id];
            if *requested > material.stock {
                errors.push(LineError::InsufficientStock {
                    material_id: material_id.clone(),
                    requested: *requested,
                    available: material.stock,
                });
            }
        }

        if !errors.is_empty() {
            return Err(eyre::eyre!(LedgerError { lines: errors }));
        }

        // Phase two: decrement stock as one batch, then attach records
        let now = Utc::now();

        let mut updated: Vec<Material> = Vec::new();
        for (material_id, requested) in &requested_totals {
            let mut material = catalog[material_id].clone();
            material.stock -= requested;
            updated.push(material);
        }
        updated.sort_by(|a, b| a.id.cmp(&b.id));

        self.storage_mut()
            .append_materials(&updated)
            .context("Failed to persist stock decrement")?;

        let records: Vec<MaterialWithdrawal> = requests
            .iter()
            .map(|request| {
                let material = &catalog[&request.material_id];
                MaterialWithdrawal {
                    material_id: material.id.clone(),
                    material_name: material.name.clone(),
                    unit: material.unit.clone(),
                    quantity: request.quantity,
                    withdrawn_by: actor.name.clone(),
                    withdrawn_at: now,
                }
            })
            .collect();

        job.tasks[task_pos].materials.extend(records.iter().cloned());
        job.activity_log.push(ActivityEntry {
            kind: ActivityKind::MaterialsWithdrawn,
            actor: actor.name.clone(),
            message: format!(
                "{} withdrew {} material line(s) for \"{}\"",
                actor.name,
                records.len(),
                job.tasks[task_pos].title
            ),
            at: now,
        });

        self.storage_mut()
            .append_job(&job)
            .context("Failed to persist withdrawal records")?;

        let mut events = Vec::new();
        if let Some(lead_id) = &job.lead_id {
            events.push(DomainEvent::addressed(
                EventKind::MaterialsWithdrawn,
                crate::types::Role::Lead,
                lead_id,
                &job.id,
                serde_json::json!({ "task_id": task_id, "lines": records.len() }),
            ));
        }

        Ok(Mutation::new(records, events))
    }
}

/// Check a batch against a catalog snapshot without touching a store.
/// Pure helper for callers that want to pre-flight a request.
pub fn validate_batch(
    requests: &[WithdrawalRequest],
    catalog: &[Material],
) -> Result<(), Vec<LineError>> {
    let by_id: HashMap<&str, &Material> =
        catalog.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut errors = Vec::new();
    let mut totals: HashMap<&str, i64> = HashMap::new();

    for request in requests {
        if request.quantity < 1 {
            errors.push(LineError::InvalidQuantity {
                material_id: request.material_id.clone(),
                quantity: request.quantity,
            });
            continue;
        }
        if !by_id.contains_key(request.material_id.as_str()) {
            errors.push(LineError::NotFound {
                material_id: request.material_id.clone(),
            });
            continue;
        }
        *totals.entry(request.material_id.as_str()).or_insert(0) += request.quantity;
    }

    for (material_id, requested) in totals {
        let material = by_id[material_id];
        if requested > material.stock {
            errors.push(LineError::InsufficientStock {
                material_id: material_id.to_string(),
                requested,
                available: material.stock,
            });
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(id: &str, stock: i64) -> Material {
        Material {
            id: id.to_string(),
            name: format!("Material {}", id),
            category: "general".to_string(),
            unit: "pcs".to_string(),
            stock,
        }
    }

    #[test]
    fn test_validate_batch_ok() {
        let catalog = vec![material("mat-a", 5), material("mat-b", 10)];
        let requests = vec![
            WithdrawalRequest::new("mat-a", 3),
            WithdrawalRequest::new("mat-b", 10),
        ];
        assert!(validate_batch(&requests, &catalog).is_ok());
    }

    #[test]
    fn test_validate_batch_collects_every_failure() {
        let catalog = vec![material("mat-a", 5)];
        let requests = vec![
            WithdrawalRequest::new("mat-a", 9),
            WithdrawalRequest::new("mat-missing", 1),
            WithdrawalRequest::new("mat-a", 0),
        ];

        let errors = validate_batch(&requests, &catalog).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| matches!(e, LineError::NotFound { .. })));
        assert!(errors.iter().any(|e| matches!(e, LineError::InvalidQuantity { .. })));
        assert!(errors.iter().any(|e| matches!(e, LineError::InsufficientStock { .. })));
    }

    #[test]
    fn test_validate_batch_sums_duplicate_lines() {
        let catalog = vec![material("mat-a", 5)];
        // 3 + 3 = 6 > 5 even though each line alone would fit
        let requests = vec![
            WithdrawalRequest::new("mat-a", 3),
            WithdrawalRequest::new("mat-a", 3),
        ];

        let errors = validate_batch(&requests, &catalog).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            LineError::InsufficientStock { requested: 6, available: 5, .. }
        ));
    }

    #[test]
    fn test_ledger_error_display_lists_lines() {
        let err = LedgerError {
            lines: vec![
                LineError::NotFound {
                    material_id: "mat-x".to_string(),
                },
                LineError::InvalidQuantity {
                    material_id: "mat-y".to_string(),
                    quantity: -2,
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("2 withdrawal line(s)"));
        assert!(text.contains("mat-x"));
        assert!(text.contains("mat-y"));
    }
}
