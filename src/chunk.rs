use std::fmt;

use crate::error::Error;

/// A chunk callback failed part-way through a [`process_in_chunks`] call.
#[derive(Debug)]
pub struct ChunkError<E> {
    /// Chunks that completed before the failing one.
    pub processed: usize,
    pub source: E,
}

impl<E> ChunkError<E> {
    pub fn into_source(self) -> E {
        self.source
    }
}

impl<E: fmt::Display> fmt::Display for ChunkError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk {} failed: {}", self.processed, self.source)
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ChunkError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Feeds `items` to `f` in consecutive chunks of `chunk_size`, in order.
///
/// The last chunk holds whatever remains. Returns the number of chunks processed, or stops at
/// the first failing chunk. No I/O and no threads are involved.
pub fn process_in_chunks<T, E, F>(
    items: &[T],
    chunk_size: usize,
    mut f: F,
) -> Result<usize, ChunkError<E>>
where
    F: FnMut(&[T]) -> Result<(), E>,
    E: From<Error>,
{
    if chunk_size == 0 {
        return Err(ChunkError {
            processed: 0,
            source: Error::InvalidBatchSize.into(),
        });
    }

    let mut processed = 0;
    for chunk in items.chunks(chunk_size) {
        if let Err(source) = f(chunk) {
            return Err(ChunkError { processed, source });
        }
        processed += 1;
    }
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_with_remainder() {
        let items: Vec<u32> = (0..10).collect();
        let mut lengths = Vec::new();
        let mut firsts = Vec::new();

        let n = process_in_chunks::<_, Error, _>(&items, 3, |chunk| {
            lengths.push(chunk.len());
            firsts.push(chunk[0]);
            Ok(())
        })
        .unwrap();

        assert_eq!(n, 4);
        assert_eq!(lengths, [3, 3, 3, 1]);
        assert_eq!(firsts, [0, 3, 6, 9]);
    }

    #[test]
    fn exact_division_has_full_last_chunk() {
        let items = ["a", "b", "c", "d"];
        let mut lengths = Vec::new();
        let n = process_in_chunks::<_, Error, _>(&items, 2, |chunk| {
            lengths.push(chunk.len());
            Ok(())
        })
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(lengths, [2, 2]);
    }

    #[test]
    fn empty_input_processes_nothing() {
        let items: [u8; 0] = [];
        let n = process_in_chunks::<_, Error, _>(&items, 5, |_| panic!("no chunks expected"))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn stops_at_first_error() {
        let items: Vec<u32> = (0..10).collect();
        let mut calls = 0;
        let err = process_in_chunks(&items, 3, |chunk| {
            calls += 1;
            if chunk[0] == 6 {
                return Err(anyhow::anyhow!("boom"));
            }
            Ok(())
        })
        .unwrap_err();

        assert_eq!(calls, 3);
        assert_eq!(err.processed, 2);
        assert_eq!(err.source.to_string(), "boom");
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let items = [1, 2, 3];
        let err =
            process_in_chunks::<_, Error, _>(&items, 0, |_| panic!("callback must not run"))
                .unwrap_err();
        assert_eq!(err.processed, 0);
        assert_eq!(err.source, Error::InvalidBatchSize);
    }
}
