//! Summary statistics over a game collection
//!
//! Game-level averages are `None` when nothing is scored, while frame-level
//! rates fall back to `0.0` on an empty denominator. The asymmetry is
//! intentional and covered by tests.

use serde::Serialize;

use crate::types::Game;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    pub frame: u8,
    /// Number of games with this frame recorded
    pub frames: u32,
    pub average_pins: Option<f64>,
    pub strike_rate: f64,
    pub spare_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_games: u32,
    pub scored_games: u32,
    pub average_score: Option<f64>,
    pub total_score: i64,
    pub best_score: Option<i32>,
    pub worst_score: Option<i32>,
    pub total_frames: u32,
    pub strikes: u32,
    pub spares: u32,
    pub strike_rate: f64,
    pub spare_rate: f64,
    pub per_frame: Vec<FrameStats>,
}

impl Summary {
    pub fn frame(&self, number: u8) -> Option<&FrameStats> {
        self.per_frame.iter().find(|f| f.frame == number)
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Count over denominator at 3 decimals, `0.0` when there is nothing to count
pub fn rate(count: u32, denominator: u32) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        round_to(f64::from(count) / f64::from(denominator), 3)
    }
}

#[derive(Default)]
struct Tally {
    frames: u32,
    strikes: u32,
    spares: u32,
    pinned_frames: u32,
    pins: u32,
}

impl Tally {
    fn add(&mut self, frame: &crate::types::Frame) {
        self.frames += 1;
        if frame.is_strike() {
            self.strikes += 1;
        } else if frame.is_spare() {
            self.spares += 1;
        }
        if let Some(pins) = frame.known_pins() {
            self.pinned_frames += 1;
            self.pins += pins;
        }
    }

    /// Spares are only possible on frames that were not strikes
    fn spare_rate(&self) -> f64 {
        rate(self.spares, self.frames - self.strikes)
    }
}

pub fn summarize<'a, I>(games: I) -> Summary
where
    I: IntoIterator<Item = &'a Game>,
{
    let mut total_games = 0u32;
    let mut scores: Vec<i32> = Vec::new();
    let mut overall = Tally::default();
    let mut per_frame: Vec<Tally> = (0..10).map(|_| Tally::default()).collect();

    for game in games {
        total_games += 1;
        if let Some(score) = game.total_score {
            scores.push(score);
        }
        for frame in &game.frames {
            if !(1..=10).contains(&frame.number) {
                continue;
            }
            overall.add(frame);
            per_frame[usize::from(frame.number - 1)].add(frame);
        }
    }

    let total_score: i64 = scores.iter().map(|s| i64::from(*s)).sum();
    let average_score = if scores.is_empty() {
        None
    } else {
        Some(round_to(total_score as f64 / scores.len() as f64, 2))
    };

    let per_frame = per_frame
        .iter()
        .enumerate()
        .filter(|(_, t)| t.frames > 0)
        .map(|(i, t)| FrameStats {
            frame: i as u8 + 1,
            frames: t.frames,
            average_pins: if t.pinned_frames == 0 {
                None
            } else {
                Some(round_to(f64::from(t.pins) / f64::from(t.pinned_frames), 2))
            },
            strike_rate: rate(t.strikes, t.frames),
            spare_rate: t.spare_rate(),
        })
        .collect();

    Summary {
        total_games,
        scored_games: scores.len() as u32,
        average_score,
        total_score,
        best_score: scores.iter().max().copied(),
        worst_score: scores.iter().min().copied(),
        total_frames: overall.frames,
        strikes: overall.strikes,
        spares: overall.spares,
        strike_rate: rate(overall.strikes, overall.frames),
        spare_rate: overall.spare_rate(),
        per_frame,
    }
}
