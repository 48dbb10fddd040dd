//! Observing seasons.
//!
//! Ground-based monitoring is interrupted every year; a season is a contiguous run
//! of samples with no gap wider than a threshold. Polynomial drift models are fitted
//! per season.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Index range `[start, end)` of one curve's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl Season {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.range().contains(&idx)
    }

    /// First and last time of the season in `times`.
    pub fn span(&self, times: &[f64]) -> (f64, f64) {
        (times[self.start], times[self.end - 1])
    }
}

/// Split sorted `times` wherever consecutive samples are more than `gap` apart.
pub fn split_seasons(times: &[f64], gap: f64) -> Vec<Season> {
    let mut seasons = Vec::new();
    if times.is_empty() {
        return seasons;
    }
    let mut start = 0;
    for i in 1..times.len() {
        if times[i] - times[i - 1] > gap {
            seasons.push(Season {
                index: seasons.len(),
                start,
                end: i,
            });
            start = i;
        }
    }
    seasons.push(Season {
        index: seasons.len(),
        start,
        end: times.len(),
    });
    seasons
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_wide_gaps_only() {
        let times = [0.0, 1.0, 3.0, 100.0, 104.0, 300.0];
        let seasons = split_seasons(&times, 60.0);
        assert_eq!(seasons.len(), 3);
        assert_eq!(seasons[0].range(), 0..3);
        assert_eq!(seasons[1].range(), 3..5);
        assert_eq!(seasons[2].range(), 5..6);
        assert_eq!(seasons[1].span(&times), (100.0, 104.0));
        assert!(seasons[2].contains(5));
    }

    #[test]
    fn one_season_for_dense_sampling() {
        let times: Vec<f64> = (0..50).map(|i| i as f64 * 2.0).collect();
        assert_eq!(split_seasons(&times, 10.0).len(), 1);
        assert!(split_seasons(&[], 10.0).is_empty());
    }
}
