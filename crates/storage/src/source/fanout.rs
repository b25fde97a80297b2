#![forbid(unsafe_code)]

use super::RowIter;
use crate::error::SourceError;
use ds_core::Record;

/// Concatenates per-item row sequences, opening each item only when the previous one is drained.
///
/// Items are files of a directory or repositories of a `--repos` list; the combined
/// order is item order, then each item's own order.
pub struct FanOut<T, F> {
    items: std::vec::IntoIter<T>,
    open: F,
    current: Option<RowIter>,
}

impl<T, F> FanOut<T, F>
where
    F: FnMut(&T) -> Result<RowIter, SourceError>,
{
    pub fn new(items: Vec<T>, open: F) -> Self {
        Self {
            items: items.into_iter(),
            open,
            current: None,
        }
    }
}

impl<T, F> Iterator for FanOut<T, F>
where
    F: FnMut(&T) -> Result<RowIter, SourceError>,
{
    type Item = Result<Record, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(rows) = self.current.as_mut() {
                if let Some(item) = rows.next() {
                    return Some(item);
                }
                self.current = None;
            }
            let item = self.items.next()?;
            match (self.open)(&item) {
                Ok(rows) => self.current = Some(rows),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_core::Value;

    fn rows(values: &[i64]) -> RowIter {
        let records = values
            .iter()
            .map(|value| Ok(Record::new(vec![Value::Integer(*value)])))
            .collect::<Vec<_>>();
        Box::new(records.into_iter())
    }

    #[test]
    fn preserves_item_order_and_skips_empty_items() {
        let fan = FanOut::new(vec![vec![1, 2], vec![], vec![3]], |values: &Vec<i64>| {
            Ok(rows(values))
        });
        let seen = fan
            .map(|row| row.expect("row").values()[0].as_i64())
            .collect::<Vec<_>>();
        assert_eq!(seen, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn opens_items_lazily() {
        let mut opened = 0;
        let mut fan = FanOut::new(vec![1_i64, 2, 3], |value: &i64| {
            opened += 1;
            Ok(rows(&[*value]))
        });
        assert!(fan.next().is_some());
        drop(fan);
        assert_eq!(opened, 1);
    }
}
