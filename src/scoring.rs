/// Composite score and qualification tier computation.
///
/// Pure functions over up to three bureau scores. The "middle score" is the
/// standard mortgage-industry composite: the median of the three bureau
/// scores. It is deliberately not attempted on partial data; when fewer than
/// three bureaus matched, tiering falls back to the maximum available score
/// (a lenient policy carried over from the business rules).
use serde::Deserialize;

use crate::models::{Bureau, Tier};

/// Configurable tier thresholds. Highest qualifying tier wins.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TierCutpoints {
    pub tier_1_min: i32,
    pub tier_2_min: i32,
    pub tier_3_min: i32,
}

impl Default for TierCutpoints {
    fn default() -> Self {
        Self {
            tier_1_min: 720,
            tier_2_min: 680,
            tier_3_min: 640,
        }
    }
}

/// Per-bureau scores for one lead, in fixed eq/tu/ex order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BureauScores {
    pub eq: Option<i32>,
    pub tu: Option<i32>,
    pub ex: Option<i32>,
}

impl BureauScores {
    pub fn get(&self, bureau: Bureau) -> Option<i32> {
        match bureau {
            Bureau::Eq => self.eq,
            Bureau::Tu => self.tu,
            Bureau::Ex => self.ex,
        }
    }

    pub fn set(&mut self, bureau: Bureau, score: Option<i32>) {
        match bureau {
            Bureau::Eq => self.eq = score,
            Bureau::Tu => self.tu = score,
            Bureau::Ex => self.ex = score,
        }
    }

    fn available(&self) -> Vec<i32> {
        [self.eq, self.tu, self.ex].into_iter().flatten().collect()
    }
}

/// Outcome of evaluating a lead's current score set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreEvaluation {
    pub middle_score: Option<i32>,
    pub tier: Tier,
    pub is_qualified: bool,
}

/// Median of the three bureau scores; defined only when all three are
/// present.
pub fn compute_middle_score(scores: BureauScores) -> Option<i32> {
    match (scores.eq, scores.tu, scores.ex) {
        (Some(a), Some(b), Some(c)) => {
            let mut sorted = [a, b, c];
            sorted.sort_unstable();
            Some(sorted[1])
        }
        _ => None,
    }
}

/// The score fed into tiering: the middle score when all three bureaus
/// matched, otherwise the maximum of whatever is available.
pub fn tiering_input(scores: BureauScores) -> Option<i32> {
    compute_middle_score(scores).or_else(|| scores.available().into_iter().max())
}

/// Deterministic threshold lookup; highest qualifying tier wins.
pub fn compute_tier(score: i32, cutpoints: &TierCutpoints) -> Tier {
    if score >= cutpoints.tier_1_min {
        Tier::Tier1
    } else if score >= cutpoints.tier_2_min {
        Tier::Tier2
    } else if score >= cutpoints.tier_3_min {
        Tier::Tier3
    } else {
        Tier::Below
    }
}

/// Full evaluation of a lead's score set.
///
/// With no scores at all the lead tiers as `below` and is not qualified.
pub fn evaluate(scores: BureauScores, cutpoints: &TierCutpoints) -> ScoreEvaluation {
    let middle_score = compute_middle_score(scores);
    let tier = match tiering_input(scores) {
        Some(score) => compute_tier(score, cutpoints),
        None => Tier::Below,
    };
    ScoreEvaluation {
        middle_score,
        tier,
        is_qualified: matches!(tier, Tier::Tier1 | Tier::Tier2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(eq: Option<i32>, tu: Option<i32>, ex: Option<i32>) -> BureauScores {
        BureauScores { eq, tu, ex }
    }

    #[test]
    fn middle_score_is_median() {
        assert_eq!(
            compute_middle_score(scores(Some(720), Some(700), Some(710))),
            Some(710)
        );
        assert_eq!(
            compute_middle_score(scores(Some(600), Some(600), Some(850))),
            Some(600)
        );
    }

    #[test]
    fn middle_score_undefined_on_partial_data() {
        assert_eq!(compute_middle_score(scores(Some(720), Some(700), None)), None);
        assert_eq!(compute_middle_score(scores(None, None, None)), None);
    }

    #[test]
    fn partial_data_tiers_from_maximum() {
        assert_eq!(tiering_input(scores(Some(640), Some(725), None)), Some(725));
        assert_eq!(tiering_input(scores(None, None, Some(612))), Some(612));
    }

    #[test]
    fn full_data_tiers_from_median() {
        assert_eq!(
            tiering_input(scores(Some(850), Some(640), Some(700))),
            Some(700)
        );
    }

    #[test]
    fn tier_thresholds() {
        let cutpoints = TierCutpoints::default();
        assert_eq!(compute_tier(720, &cutpoints), Tier::Tier1);
        assert_eq!(compute_tier(719, &cutpoints), Tier::Tier2);
        assert_eq!(compute_tier(680, &cutpoints), Tier::Tier2);
        assert_eq!(compute_tier(679, &cutpoints), Tier::Tier3);
        assert_eq!(compute_tier(640, &cutpoints), Tier::Tier3);
        assert_eq!(compute_tier(639, &cutpoints), Tier::Below);
    }

    #[test]
    fn qualification_is_tier_1_or_2() {
        let cutpoints = TierCutpoints::default();
        assert!(evaluate(scores(Some(730), Some(740), Some(750)), &cutpoints).is_qualified);
        assert!(evaluate(scores(Some(690), None, None), &cutpoints).is_qualified);
        assert!(!evaluate(scores(Some(650), Some(650), Some(650)), &cutpoints).is_qualified);
    }

    #[test]
    fn no_scores_falls_back_to_below() {
        let eval = evaluate(BureauScores::default(), &TierCutpoints::default());
        assert_eq!(eval.middle_score, None);
        assert_eq!(eval.tier, Tier::Below);
        assert!(!eval.is_qualified);
    }
}
