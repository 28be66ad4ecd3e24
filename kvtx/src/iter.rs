use crate::cancel::CancelScope;
use crate::engine::EngineCursor;
use crate::errors::{ErrorKind, KvError, KvResult};
use crate::range::KeyRange;
use std::fmt::{Debug, Formatter};

#[derive(Debug)]
enum IterState {
    Positioned,
    Exhausted,
    Failed(KvError),
}

/// Lazy, pull-based iterator over the pairs of a [`KeyRange`].
///
/// A `KvIter` wraps one engine cursor. Every step reads the key under the
/// cursor, checks it against the range and copies the value out. The first
/// key outside the range, the end of the cursor, or any read failure puts
/// the iterator in a terminal state for good; the cursor is closed at that
/// moment, or on drop if the iterator is abandoned while still positioned.
/// A step taken after the owning handle was cancelled fails with
/// [`ErrorKind::Cancelled`] instead of moving the cursor.
///
/// ```rust,ignore
/// let tx = db.new_transaction()?;
/// let mut iter = tx.ascend("b", "d")?;
/// let mut item = iter.current();
/// while let Some((key, value)) = item {
///     println!("{key} = {value:?}");
///     item = iter.next();
/// }
/// if let Some(err) = iter.err() {
///     return Err(err.clone());
/// }
/// ```
pub struct KvIter<C: EngineCursor> {
    cursor: C,
    range: KeyRange,
    reverse: bool,
    key: String,
    value: Vec<u8>,
    state: IterState,
    cancel: CancelScope,
}

impl<C: EngineCursor> KvIter<C> {
    /// Forward iteration from `range.begin()`; `cursor` must be a forward cursor.
    pub(crate) fn ascending(cursor: C, range: KeyRange) -> Self {
        let mut iter = KvIter::unpositioned(cursor, range, false);
        if iter.range.begin().is_empty() {
            iter.cursor.rewind();
        } else {
            iter.cursor.seek(iter.range.begin().as_bytes());
        }
        iter.fetch();
        iter
    }

    /// Reverse iteration from just below `range.end()`; `cursor` must be a
    /// reverse cursor.
    pub(crate) fn descending(cursor: C, range: KeyRange) -> Self {
        let mut iter = KvIter::unpositioned(cursor, range, true);
        iter.cursor.rewind();
        if !iter.range.end().is_empty() {
            let end = iter.range.end().as_bytes();
            iter.cursor.seek(end);
            // reverse seek lands on end itself when present, end is exclusive
            if iter.cursor.valid() && iter.cursor.key().is_ok_and(|k| k == end) {
                iter.cursor.next();
            }
        }
        iter.fetch();
        iter
    }

    fn unpositioned(cursor: C, range: KeyRange, reverse: bool) -> Self {
        KvIter {
            cursor,
            range,
            reverse,
            key: String::new(),
            value: Vec::new(),
            state: IterState::Positioned,
            cancel: CancelScope::default(),
        }
    }

    pub(crate) fn with_cancel(mut self, cancel: CancelScope) -> Self {
        self.cancel = cancel;
        self
    }

    /// The pair the iterator is positioned at, or `None` once terminal.
    pub fn current(&self) -> Option<(&str, &[u8])> {
        match self.state {
            IterState::Positioned => Some((self.key.as_str(), self.value.as_slice())),
            _ => None,
        }
    }

    /// Advances one step and returns the new current pair.
    ///
    /// A terminal iterator stays terminal and never touches the cursor again.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<(&str, &[u8])> {
        if !self.is_valid() {
            return None;
        }
        if self.cancel.is_cancelled() {
            log::debug!("Iterator cancelled at {:?}", self.key);
            self.finish(IterState::Failed(KvError::cancelled()));
            return None;
        }
        self.cursor.next();
        self.fetch();
        self.current()
    }

    /// The failure that ended iteration. Plain exhaustion is not an error.
    pub fn err(&self) -> Option<&KvError> {
        match &self.state {
            IterState::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.state, IterState::Positioned)
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    pub fn range(&self) -> &KeyRange {
        &self.range
    }

    fn fetch(&mut self) {
        if !self.cursor.valid() {
            self.finish(IterState::Exhausted);
            return;
        }

        let key = match self.cursor.key() {
            Ok(raw) => String::from_utf8(raw.to_vec()).map_err(|e| {
                KvError::new(
                    &format!("stored key is not valid UTF-8: {}", e),
                    ErrorKind::IOFailure,
                )
            }),
            Err(err) => Err(KvError::from(err)),
        };
        let key = match key {
            Ok(key) => key,
            Err(err) => return self.fail(err),
        };

        if !self.range.contains(&key) {
            self.finish(IterState::Exhausted);
            return;
        }

        match self.cursor.value() {
            Ok(value) => {
                self.key = key;
                self.value = value;
            }
            Err(err) => self.fail(KvError::from(err)),
        }
    }

    fn fail(&mut self, err: KvError) {
        log::error!("Range iteration over {:?} failed: {}", self.range, err);
        self.finish(IterState::Failed(err));
    }

    fn finish(&mut self, state: IterState) {
        if self.is_valid() {
            self.cursor.close();
        }
        self.key.clear();
        self.value.clear();
        self.state = state;
    }
}

impl<C: EngineCursor> Drop for KvIter<C> {
    fn drop(&mut self) {
        if self.is_valid() {
            self.cursor.close();
        }
    }
}

impl<C: EngineCursor> Debug for KvIter<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvIter")
            .field("range", &self.range)
            .field("reverse", &self.reverse)
            .field("state", &self.state)
            .finish()
    }
}

impl<C: EngineCursor> IntoIterator for KvIter<C> {
    type Item = KvResult<(String, Vec<u8>)>;
    type IntoIter = KvIntoIter<C>;

    fn into_iter(self) -> Self::IntoIter {
        KvIntoIter {
            inner: self,
            primed: false,
            finished: false,
        }
    }
}

/// Owning adapter that turns a [`KvIter`] into a std iterator.
///
/// Yields every pair in order, then one `Err` item if iteration failed.
pub struct KvIntoIter<C: EngineCursor> {
    inner: KvIter<C>,
    primed: bool,
    finished: bool,
}

impl<C: EngineCursor> Iterator for KvIntoIter<C> {
    type Item = KvResult<(String, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.primed {
            self.inner.next();
        } else {
            self.primed = true;
        }

        match &self.inner.state {
            IterState::Positioned => Some(Ok((
                std::mem::take(&mut self.inner.key),
                std::mem::take(&mut self.inner.value),
            ))),
            IterState::Exhausted => {
                self.finished = true;
                None
            }
            IterState::Failed(err) => {
                self.finished = true;
                Some(Err(err.clone()))
            }
        }
    }
}
