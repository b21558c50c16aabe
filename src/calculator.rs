use crate::prelude::*;
use crate::property::PropertyField;

use std::collections::BTreeMap;

/// Variable name to value, accumulated over all commands of one work cycle.
pub type Variables = BTreeMap<String, f64>;

pub struct StringArrayCalculator;

impl StringArrayCalculator {
    /// Applies every rule in `fields` to `data` and merges the results into
    /// `variables`. A rule whose token is missing or not numeric is skipped
    /// for this call; the others still run. Returns how many were written.
    pub fn calculate(data: &[String], fields: &[PropertyField], variables: &mut Variables) -> usize {
        let mut written = 0;

        for field in fields {
            let Some(raw) = data.get(field.index) else {
                warn!(
                    "{}: token {} requested but reply has only {}",
                    field.name,
                    field.index,
                    data.len()
                );
                continue;
            };

            match field.decode_value(raw) {
                Some(value) => {
                    trace!("{} = {} (raw {:?})", field.name, value, raw);
                    variables.insert(field.name.clone(), value);
                    written += 1;
                }
                None => debug!("{}: {:?} is not a number, skipped", field.name, raw),
            }
        }

        written
    }
}
