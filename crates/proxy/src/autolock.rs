use fxhash::FxHashSet;

/// File ids whose access handle was taken implicitly, without an explicit lock.
///
/// Idle maintenance releases every handle in the set; an explicit lock or an unlock
/// takes the id out of it.
#[derive(Debug, Default)]
pub(crate) struct AutoLocks {
    fids: FxHashSet<i32>,
}

impl AutoLocks {
    pub(crate) fn insert(&mut self, fid: i32) -> bool {
        self.fids.insert(fid)
    }

    pub(crate) fn remove(&mut self, fid: i32) -> bool {
        self.fids.remove(&fid)
    }

    pub(crate) fn contains(&self, fid: i32) -> bool {
        self.fids.contains(&fid)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fids.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.fids.len()
    }

    /// Empties the set, returning its ids in ascending order.
    pub(crate) fn take_all(&mut self) -> Vec<i32> {
        let mut fids: Vec<i32> = self.fids.drain().collect();
        fids.sort_unstable();
        fids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership() {
        let mut locks = AutoLocks::default();
        assert!(locks.insert(3));
        assert!(!locks.insert(3));
        locks.insert(1);
        assert!(locks.contains(1));
        assert_eq!(locks.len(), 2);

        assert!(locks.remove(1));
        assert!(!locks.remove(1));
        assert_eq!(locks.take_all(), vec![3]);
        assert!(locks.is_empty());
    }
}
