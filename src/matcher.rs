//! Identifier matching: which existing customer does a lead belong to.

use crate::identifiers::IdentifierSet;
use crate::models::Customer;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Outcome of matching a lead's identifiers against stored customers.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// The customer the lead is attached to.
    pub customer: Option<Customer>,
    /// Other customers sharing at least one identifier with the lead.
    pub conflicts: Vec<Customer>,
}

impl MatchResult {
    pub fn conflict_ids(&self) -> Vec<Uuid> {
        self.conflicts.iter().map(|c| c.id).collect()
    }
}

/// True when any identifier of `customer` equals the corresponding lead identifier.
pub fn matches(customer: &Customer, ids: &IdentifierSet) -> bool {
    fn eq(stored: &Option<String>, incoming: &Option<String>) -> bool {
        matches!((stored, incoming), (Some(a), Some(b)) if a == b)
    }

    eq(&customer.mobile, &ids.mobile)
        || eq(&customer.pan, &ids.pan)
        || eq(&customer.aadhaar_ref, &ids.aadhaar_ref)
        || eq(&customer.ucid, &ids.ucid)
        || eq(&customer.previous_lan, &ids.previous_lan)
}

/// Picks the customer a lead belongs to among `candidates`.
///
/// Several distinct customers can match through different identifiers when the
/// stored data is inconsistent. The earliest-created one wins (ties broken by
/// id) and the others are reported as conflicts.
pub fn resolve(candidates: Vec<Customer>, ids: &IdentifierSet) -> MatchResult {
    let mut matched: Vec<Customer> = candidates
        .into_iter()
        .filter(|c| matches(c, ids))
        .collect();
    matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    matched.dedup_by_key(|c| c.id);

    let mut iter = matched.into_iter();
    let customer = iter.next();
    let conflicts: Vec<Customer> = iter.collect();

    if let Some(ref winner) = customer {
        if !conflicts.is_empty() {
            tracing::warn!(
                "Lead ({}) matches {} customers; using {} created at {}, conflicting: {:?}",
                ids.masked(),
                conflicts.len() + 1,
                winner.id,
                winner.created_at,
                conflicts.iter().map(|c| c.id).collect::<Vec<_>>()
            );
        }
    }

    MatchResult {
        customer,
        conflicts,
    }
}

/// Customer-level fields a lead may carry besides identifiers.
#[derive(Debug, Clone, Default)]
pub struct CustomerUpdate<'a> {
    pub attributes: Option<&'a Map<String, Value>>,
    pub segment: Option<&'a str>,
    pub dnd: Option<bool>,
}

/// Builds the customer row for a lead that matched nobody.
pub fn new_customer(ids: &IdentifierSet, update: &CustomerUpdate<'_>, now: DateTime<Utc>) -> Customer {
    Customer {
        id: Uuid::new_v4(),
        mobile: ids.mobile.clone(),
        pan: ids.pan.clone(),
        aadhaar_ref: ids.aadhaar_ref.clone(),
        ucid: ids.ucid.clone(),
        previous_lan: ids.previous_lan.clone(),
        attributes: Value::Object(update.attributes.cloned().unwrap_or_default()),
        segment: update.segment.map(str::to_string),
        dnd: update.dnd.unwrap_or(false),
        created_at: now,
        updated_at: now,
    }
}

/// Folds a matching lead into an existing customer.
///
/// Missing identifiers are filled in unless a conflicting customer already
/// holds the value; identifiers already set are never overwritten. Attributes
/// are merged key by key with the lead's values winning. Returns whether
/// anything changed.
pub fn merge_into(
    customer: &mut Customer,
    ids: &IdentifierSet,
    conflicts: &[Customer],
    update: &CustomerUpdate<'_>,
    now: DateTime<Utc>,
) -> bool {
    let mut changed = false;

    macro_rules! fill {
        ($field:ident) => {
            if let Some(value) = ids.$field.as_ref() {
                if customer.$field.is_none() {
                    let held_elsewhere = conflicts
                        .iter()
                        .any(|c| c.$field.as_deref() == Some(value.as_str()));
                    if held_elsewhere {
                        tracing::warn!(
                            "Not copying {} onto customer {}: held by another customer",
                            stringify!($field),
                            customer.id
                        );
                    } else {
                        customer.$field = Some(value.clone());
                        changed = true;
                    }
                } else if customer.$field.as_deref() != Some(value.as_str()) {
                    tracing::debug!(
                        "Customer {} keeps stored {} over a different incoming value",
                        customer.id,
                        stringify!($field)
                    );
                }
            }
        };
    }

    fill!(mobile);
    fill!(pan);
    fill!(aadhaar_ref);
    fill!(ucid);
    fill!(previous_lan);

    if let Some(incoming) = update.attributes {
        if !incoming.is_empty() {
            let mut merged = match customer.attributes.take() {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            for (key, value) in incoming {
                if merged.get(key) != Some(value) {
                    merged.insert(key.clone(), value.clone());
                    changed = true;
                }
            }
            customer.attributes = Value::Object(merged);
        }
    }

    if let Some(segment) = update.segment {
        if customer.segment.as_deref() != Some(segment) {
            customer.segment = Some(segment.to_string());
            changed = true;
        }
    }

    if let Some(dnd) = update.dnd {
        if customer.dnd != dnd {
            customer.dnd = dnd;
            changed = true;
        }
    }

    if changed {
        customer.updated_at = now;
    }
    changed
}
