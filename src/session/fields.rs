use super::handler::{FieldId, FieldReading, FieldSource};

/// Watched fields with the reading last reported for each.
#[derive(Debug, Default)]
pub(crate) struct FieldList {
    entries: Vec<(FieldId, FieldReading)>,
}

impl FieldList {
    /// Watch `ids`. Every field starts out invalid with an empty value, so the
    /// first good reading is reported as a change.
    pub(crate) fn new(ids: Vec<FieldId>) -> Self {
        FieldList { entries: ids.into_iter().map(|id| (id, FieldReading::invalid())).collect() }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-read every field, store the new readings and return the ones that
    /// differ from what was stored, in subscription order.
    pub(crate) fn poll(&mut self, source: &dyn FieldSource) -> Vec<(FieldId, FieldReading)> {
        let mut changed = Vec::new();
        for (id, last) in &mut self.entries {
            let reading = source.read_field(id);
            if reading != *last {
                *last = reading.clone();
                changed.push((id.clone(), reading));
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, sync::Mutex};

    struct MapSource(Mutex<HashMap<FieldId, FieldReading>>);

    impl MapSource {
        fn set(&self, id: &FieldId, reading: FieldReading) {
            self.0.lock().unwrap().insert(id.clone(), reading);
        }
    }

    impl FieldSource for MapSource {
        fn read_field(&self, id: &FieldId) -> FieldReading {
            self.0.lock().unwrap().get(id).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn reports_value_and_validity_changes_once() {
        let temp = FieldId::new("Thermo", "Temp");
        let mode = FieldId::new("Thermo", "Mode");
        let source = MapSource(Mutex::new(HashMap::new()));
        let mut list = FieldList::new(vec![temp.clone(), mode.clone()]);
        assert_eq!(list.len(), 2);

        // Nothing known yet: invalid and empty matches the initial state.
        assert!(list.poll(&source).is_empty());

        source.set(&temp, FieldReading::valid("21"));
        assert_eq!(list.poll(&source), vec![(temp.clone(), FieldReading::valid("21"))]);
        assert!(list.poll(&source).is_empty());

        // Same value, validity flipped.
        source.set(&temp, FieldReading { valid: false, value: "21".into() });
        let changed = list.poll(&source);
        assert_eq!(changed.len(), 1);
        assert!(!changed[0].1.valid);

        source.set(&mode, FieldReading::valid("Heat"));
        source.set(&temp, FieldReading::valid("22"));
        let changed: Vec<_> = list.poll(&source).into_iter().map(|(id, _)| id).collect();
        assert_eq!(changed, vec![temp, mode]);
    }
}
