use serde::{Deserialize, Serialize};

/// One recognized span of speech, times in seconds from the start of the
/// source audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            speaker: None,
        }
    }

    /// Shift both endpoints by `offset_secs`. Used when folding chunk-local
    /// times back onto the source timeline.
    pub fn offset_by(&mut self, offset_secs: f64) {
        self.start += offset_secs;
        self.end += offset_secs;
    }
}

/// A speaker turn produced by diarization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerTurn {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

/// Assign a speaker label to each segment by maximal temporal overlap with
/// the diarization turns. Ties go to the first-seen label; a segment with no
/// overlapping turn keeps `speaker = None`. An empty turn list leaves the
/// segments unchanged.
pub fn assign_speakers(segments: &mut [Segment], turns: &[SpeakerTurn]) {
    if turns.is_empty() {
        return;
    }
    for segment in segments.iter_mut() {
        let mut best: Option<(&str, f64)> = None;
        for turn in turns {
            let overlap = overlap_secs(segment.start, segment.end, turn.start, turn.end);
            if overlap <= 0.0 {
                continue;
            }
            match best {
                Some((_, best_overlap)) if overlap <= best_overlap => {}
                _ => best = Some((turn.speaker.as_str(), overlap)),
            }
        }
        if let Some((label, _)) = best {
            segment.speaker = Some(label.to_string());
        }
    }
}

fn overlap_secs(a_start: f64, a_end: f64, b_start: f64, b_end: f64) -> f64 {
    (a_end.min(b_end) - a_start.max(b_start)).max(0.0)
}
