use std::cmp::PartialEq;

/// Run-length encoded sequence, used for the per-byte line and column tables.
#[derive(Debug, Default, Clone)]
pub struct RLE<T: PartialEq> {
    data: Vec<(T, usize)>,
}

impl<T: PartialEq> RLE<T> {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn push(&mut self, item: T) {
        if let Some(last) = self.data.last_mut() {
            if last.0 == item {
                last.1 += 1;
                return;
            }
        }
        self.data.push((item, 1));
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        let mut index = index;
        for (item, count) in self.data.iter() {
            if index >= *count {
                index -= count;
            } else {
                return Some(item);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.data.iter().map(|(_, count)| count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of runs actually stored.
    pub fn runs(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_are_merged() {
        let mut rle = RLE::new();
        for line in [1, 1, 1, 2, 2, 5] {
            rle.push(line);
        }
        assert_eq!(rle.runs(), 3);
        assert_eq!(rle.len(), 6);
        assert_eq!(rle.get(2), Some(&1));
        assert_eq!(rle.get(3), Some(&2));
        assert_eq!(rle.get(5), Some(&5));
        assert_eq!(rle.get(6), None);
    }
}
