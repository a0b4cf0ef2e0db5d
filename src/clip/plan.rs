//! Time range to chunk mapping
//!
//! Chunk `c` covers `[reference + start_of(c), reference + start_of(c+1))`.
//! A requested range is split into a trim of its first chunk, verbatim
//! copies of every chunk fully inside it, and a trim of its last chunk.

use super::types::{ClipError, ClipKind, ClipPiece, TrimRange};

/// Pieces shorter than this are not emitted
const MIN_PIECE_SECS: f64 = 1e-6;

/// Tolerance when deciding whether a start sits on a chunk boundary
const GRID_EPS: f64 = 1e-9;

/// Start offsets of a recording's chunks, relative to its reference time
///
/// Chunks normally start on multiples of the chunk length. A chunk cut
/// early by an encoder failure moves the next start off that grid, so the
/// actual starts of opened chunks are kept and later chunks are projected
/// onto the following boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkTimeline {
    chunk_length: f64,
    starts: Vec<f64>,
}

impl ChunkTimeline {
    pub fn new(chunk_length: f64) -> Self {
        Self {
            chunk_length,
            starts: vec![0.0],
        }
    }

    pub fn chunk_length(&self) -> f64 {
        self.chunk_length
    }

    /// Record the offset chunk `index` was actually opened at
    ///
    /// Later recorded starts are discarded.
    pub fn record_start(&mut self, index: usize, offset: f64) {
        if index == 0 {
            self.starts = vec![offset];
            return;
        }
        self.starts.truncate(index);
        while self.starts.len() < index {
            let next = self.start_of(self.starts.len());
            self.starts.push(next);
        }
        self.starts.push(offset);
    }

    /// First grid slot after the last recorded start
    fn next_slot(&self) -> usize {
        let last = self.starts.last().copied().unwrap_or(0.0);
        (last / self.chunk_length + GRID_EPS).floor().max(0.0) as usize + 1
    }

    pub fn start_of(&self, index: usize) -> f64 {
        match self.starts.get(index) {
            Some(start) => *start,
            None => {
                let ahead = index - self.starts.len();
                self.next_slot().saturating_add(ahead) as f64 * self.chunk_length
            }
        }
    }

    pub fn end_of(&self, index: usize) -> f64 {
        self.start_of(index.saturating_add(1))
    }

    /// Chunk covering a non-negative offset
    pub fn chunk_at(&self, offset: f64) -> usize {
        let known = self.starts.partition_point(|start| *start <= offset);
        if known < self.starts.len() {
            return known.saturating_sub(1);
        }

        let recorded = self.starts.len();
        let first_projected = self.start_of(recorded);
        if offset < first_projected {
            return recorded - 1;
        }
        let ahead = ((offset - first_projected) / self.chunk_length).floor() as usize;
        recorded.saturating_add(ahead)
    }
}

/// Split `[start, end)` (absolute seconds) into per-chunk pieces
///
/// No piece may reference a chunk after `last_chunk`; a range reaching past
/// its end is rejected. A chunk length of zero means the recording is a
/// single file, so the whole range is one trim of chunk 0.
pub fn plan_clip(
    reference_time: f64,
    timeline: &ChunkTimeline,
    last_chunk: usize,
    start: f64,
    end: f64,
) -> Result<Vec<ClipPiece>, ClipError> {
    if !start.is_finite() || !end.is_finite() || start >= end || start < reference_time {
        return Err(ClipError::InvalidRange { start, end });
    }

    let rel_start = start - reference_time;
    let rel_end = end - reference_time;

    if timeline.chunk_length() <= 0.0 {
        return Ok(vec![ClipPiece {
            chunk_index: 0,
            kind: ClipKind::Trim,
            trim: TrimRange::new(rel_start, rel_end),
            log_start: start,
            log_end: end,
        }]);
    }

    if rel_end > timeline.end_of(last_chunk) + MIN_PIECE_SECS {
        tracing::warn!(
            "Clip [{:.3}, {:.3}] reaches past chunk {}",
            start,
            end,
            last_chunk
        );
        return Err(ClipError::InvalidRange { start, end });
    }

    let mut pieces: Vec<ClipPiece> = Vec::new();

    for index in timeline.chunk_at(rel_start)..=last_chunk {
        let chunk_start = timeline.start_of(index);
        if chunk_start >= rel_end {
            break;
        }
        let chunk_end = timeline.end_of(index);

        let from = rel_start.max(chunk_start);
        let to = rel_end.min(chunk_end);
        // An end exactly on a boundary would leave an empty trailing trim
        if to - from <= MIN_PIECE_SECS {
            continue;
        }

        let whole = from <= chunk_start && to >= chunk_end;
        pieces.push(ClipPiece {
            chunk_index: index,
            kind: if whole && !pieces.is_empty() {
                ClipKind::Copy
            } else {
                ClipKind::Trim
            },
            trim: TrimRange::new(from - chunk_start, to - chunk_start),
            log_start: if from == rel_start {
                start
            } else {
                reference_time + chunk_start
            },
            log_end: if to == rel_end {
                end
            } else {
                reference_time + chunk_end
            },
        });
    }

    if pieces.is_empty() {
        return Err(ClipError::InvalidRange { start, end });
    }
    Ok(pieces)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn plan(reference: f64, chunk_length: f64, start: f64, end: f64) -> Result<Vec<ClipPiece>, ClipError> {
        plan_clip(reference, &ChunkTimeline::new(chunk_length), 1000, start, end)
    }

    #[test]
    fn test_single_chunk_range() {
        let pieces = plan(0.0, 5.0, 6.0, 8.5).unwrap();
        assert_eq!(
            pieces,
            vec![ClipPiece {
                chunk_index: 1,
                kind: ClipKind::Trim,
                trim: TrimRange::new(1.0, 3.5),
                log_start: 6.0,
                log_end: 8.5,
            }]
        );
    }

    #[test]
    fn test_spanning_range_trims_copies_and_trims() {
        let pieces = plan(0.0, 5.0, 3.0, 12.0).unwrap();
        assert_eq!(pieces.len(), 3);

        assert_eq!(pieces[0].chunk_index, 0);
        assert_eq!(pieces[0].kind, ClipKind::Trim);
        assert_eq!(pieces[0].trim, TrimRange::new(3.0, 5.0));
        assert_eq!((pieces[0].log_start, pieces[0].log_end), (3.0, 5.0));

        assert_eq!(pieces[1].chunk_index, 1);
        assert_eq!(pieces[1].kind, ClipKind::Copy);
        assert_eq!((pieces[1].log_start, pieces[1].log_end), (5.0, 10.0));

        assert_eq!(pieces[2].chunk_index, 2);
        assert_eq!(pieces[2].kind, ClipKind::Trim);
        assert_eq!(pieces[2].trim, TrimRange::new(0.0, 2.0));
        assert_eq!((pieces[2].log_start, pieces[2].log_end), (10.0, 12.0));
    }

    #[test]
    fn test_reference_time_offsets_log_but_not_trim() {
        let pieces = plan(100.0, 5.0, 103.0, 107.0).unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].trim, TrimRange::new(3.0, 5.0));
        assert_eq!((pieces[0].log_start, pieces[0].log_end), (103.0, 105.0));
        assert_eq!(pieces[1].trim, TrimRange::new(0.0, 2.0));
        assert_eq!((pieces[1].log_start, pieces[1].log_end), (105.0, 107.0));
    }

    #[test]
    fn test_end_on_boundary_emits_no_empty_piece() {
        let pieces = plan(0.0, 5.0, 3.0, 10.0).unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[1].kind, ClipKind::Copy);
        assert_eq!(pieces[1].log_end, 10.0);
    }

    #[test]
    fn test_chunking_disabled_is_one_trim() {
        let pieces = plan(10.0, 0.0, 12.0, 40.0).unwrap();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].chunk_index, 0);
        assert_eq!(pieces[0].trim, TrimRange::new(2.0, 30.0));
    }

    #[test]
    fn test_invalid_ranges_are_rejected() {
        assert!(matches!(plan(0.0, 5.0, 4.0, 4.0), Err(ClipError::InvalidRange { .. })));
        assert!(matches!(plan(0.0, 5.0, 6.0, 4.0), Err(ClipError::InvalidRange { .. })));
        assert!(matches!(plan(10.0, 5.0, 4.0, 12.0), Err(ClipError::InvalidRange { .. })));
        assert!(matches!(plan(0.0, 5.0, f64::NAN, 4.0), Err(ClipError::InvalidRange { .. })));
    }

    #[test]
    fn test_pieces_tile_the_requested_range() {
        let chunk_length = 5.0;
        let points: Vec<f64> = (0..=60).map(|i| i as f64 * 0.5).collect();

        for (i, &start) in points.iter().enumerate() {
            for &end in &points[i + 1..] {
                let pieces = plan(0.0, chunk_length, start, end).unwrap();
                assert!(!pieces.is_empty());

                assert!((pieces[0].log_start - start).abs() < EPS);
                assert!((pieces[pieces.len() - 1].log_end - end).abs() < EPS);

                for pair in pieces.windows(2) {
                    assert!((pair[0].log_end - pair[1].log_start).abs() < EPS);
                    assert!(pair[0].chunk_index < pair[1].chunk_index);
                }

                for piece in &pieces {
                    assert!(piece.trim.start >= -EPS && piece.trim.end <= chunk_length + EPS);
                    assert!(piece.trim.duration() > 0.0);
                    assert!((piece.trim.duration() - (piece.log_end - piece.log_start)).abs() < EPS);
                }
            }
        }
    }

    #[test]
    fn test_range_past_last_chunk_is_rejected() {
        let timeline = ChunkTimeline::new(5.0);

        assert!(matches!(
            plan_clip(0.0, &timeline, 3, 0.0, 1e13),
            Err(ClipError::InvalidRange { .. })
        ));
        assert!(matches!(
            plan_clip(0.0, &timeline, 3, 0.0, 20.5),
            Err(ClipError::InvalidRange { .. })
        ));
        assert!(matches!(
            plan_clip(0.0, &timeline, usize::MAX, 1e300, f64::MAX),
            Err(ClipError::InvalidRange { .. })
        ));

        let pieces = plan_clip(0.0, &timeline, 3, 0.0, 20.0).unwrap();
        assert_eq!(pieces.len(), 4);
        assert_eq!(pieces[3].chunk_index, 3);
    }

    #[test]
    fn test_early_cut_moves_following_boundaries() {
        let mut timeline = ChunkTimeline::new(5.0);
        timeline.record_start(1, 2.0);

        assert_eq!(timeline.start_of(1), 2.0);
        assert_eq!(timeline.start_of(2), 5.0);
        assert_eq!(timeline.start_of(3), 10.0);
        assert_eq!(timeline.chunk_at(1.0), 0);
        assert_eq!(timeline.chunk_at(3.0), 1);
        assert_eq!(timeline.chunk_at(5.0), 2);
        assert_eq!(timeline.chunk_at(12.0), 3);

        let pieces = plan_clip(0.0, &timeline, 4, 3.0, 8.0).unwrap();
        assert_eq!(
            pieces,
            vec![
                ClipPiece {
                    chunk_index: 1,
                    kind: ClipKind::Trim,
                    trim: TrimRange::new(1.0, 3.0),
                    log_start: 3.0,
                    log_end: 5.0,
                },
                ClipPiece {
                    chunk_index: 2,
                    kind: ClipKind::Trim,
                    trim: TrimRange::new(0.0, 3.0),
                    log_start: 5.0,
                    log_end: 8.0,
                },
            ]
        );

        let pieces = plan_clip(0.0, &timeline, 4, 1.0, 12.0).unwrap();
        let kinds: Vec<(usize, ClipKind)> = pieces.iter().map(|p| (p.chunk_index, p.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (0, ClipKind::Trim),
                (1, ClipKind::Copy),
                (2, ClipKind::Copy),
                (3, ClipKind::Trim),
            ]
        );
        assert_eq!(pieces[1].trim, TrimRange::new(0.0, 3.0));
        assert_eq!((pieces[1].log_start, pieces[1].log_end), (2.0, 5.0));
    }

    #[test]
    fn test_recording_a_start_again_discards_later_ones() {
        let mut timeline = ChunkTimeline::new(5.0);
        timeline.record_start(1, 5.0);
        timeline.record_start(2, 7.5);
        timeline.record_start(2, 10.0);

        assert_eq!(timeline.start_of(2), 10.0);
        assert_eq!(timeline.start_of(3), 15.0);

        timeline.record_start(4, 21.0);
        assert_eq!(timeline.start_of(3), 15.0);
        assert_eq!(timeline.start_of(4), 21.0);
        assert_eq!(timeline.start_of(5), 25.0);
    }
}
