//! Context tagging: energy level, time estimate and weekly-win flag.
//!
//! Explicit values always win, so tagging an already-tagged task changes
//! nothing.

use crate::keywords::{self, ADMIN, HIGH_IMPACT};
use crate::schema::{EnergyLevel, EstimatedTime, Priority, ProposedTask};

pub fn apply_context_tags(task: &ProposedTask) -> ProposedTask {
    let mut tagged = task.clone();
    let text = tag_text(task);

    let energy = *tagged
        .energy_level
        .get_or_insert_with(|| infer_energy(&text));

    if tagged.estimated_time.is_none() {
        tagged.estimated_time = infer_time(task.estimated_minutes, &text);
    }

    if tagged.is_weekly_win.is_none() {
        tagged.is_weekly_win = Some(infer_weekly_win(task, energy, &text));
    }

    tagged
}

fn tag_text(task: &ProposedTask) -> String {
    format!("{} {} {}", task.category, task.title, task.summary)
}

fn infer_energy(text: &str) -> EnergyLevel {
    if ADMIN.matches(text) {
        EnergyLevel::LowEnergyAdmin
    } else {
        EnergyLevel::HighFocus
    }
}

/// Minutes first, then keyword cues. `None` when there is no signal.
fn infer_time(minutes: Option<u32>, text: &str) -> Option<EstimatedTime> {
    minutes
        .or_else(|| keywords::time_cue_minutes(text))
        .map(EstimatedTime::from_minutes)
}

fn infer_weekly_win(task: &ProposedTask, energy: EnergyLevel, text: &str) -> bool {
    let focused = energy == EnergyLevel::HighFocus;
    task.category.trim().eq_ignore_ascii_case("strategic")
        || !task.theme_tag.trim().is_empty()
        || (focused && HIGH_IMPACT.matches(text))
        || (focused && task.priority == Priority::High)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(title: &str) -> ProposedTask {
        ProposedTask {
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_admin_keywords_lower_energy() {
        let tagged = apply_context_tags(&task("Email Year 8 parents about the trip"));
        assert_eq!(tagged.energy_level, Some(EnergyLevel::LowEnergyAdmin));
        assert_eq!(tagged.estimated_time, Some(EstimatedTime::FiveMin));
        assert_eq!(tagged.is_weekly_win, Some(false));
    }

    #[test]
    fn test_category_counts_as_text() {
        let mut t = task("Sort out the cupboard");
        t.category = "Admin".into();
        assert_eq!(
            apply_context_tags(&t).energy_level,
            Some(EnergyLevel::LowEnergyAdmin)
        );
    }

    #[test]
    fn test_minutes_beat_keywords() {
        let mut t = task("Draft the letter");
        t.estimated_minutes = Some(10);
        assert_eq!(
            apply_context_tags(&t).estimated_time,
            Some(EstimatedTime::FifteenMin)
        );
    }

    #[test]
    fn test_no_time_signal_stays_empty() {
        assert_eq!(apply_context_tags(&task("Think")).estimated_time, None);
    }

    #[test]
    fn test_weekly_win_rules() {
        let mut strategic = task("Anything");
        strategic.category = "Strategic".into();
        assert_eq!(apply_context_tags(&strategic).is_weekly_win, Some(true));

        let mut linked = task("Anything");
        linked.theme_tag = "Reading for pleasure".into();
        assert_eq!(apply_context_tags(&linked).is_weekly_win, Some(true));

        assert_eq!(
            apply_context_tags(&task("Rewrite the KS3 curriculum map")).is_weekly_win,
            Some(true)
        );

        let mut urgent_admin = task("Update the register");
        urgent_admin.priority = Priority::High;
        assert_eq!(apply_context_tags(&urgent_admin).is_weekly_win, Some(false));

        let mut urgent_focus = task("Observe the lesson");
        urgent_focus.priority = Priority::High;
        assert_eq!(apply_context_tags(&urgent_focus).is_weekly_win, Some(true));
    }

    #[test]
    fn test_explicit_values_win() {
        let mut t = task("Email the governors about strategy");
        t.energy_level = Some(EnergyLevel::HighFocus);
        t.estimated_time = Some(EstimatedTime::HourPlus);
        t.is_weekly_win = Some(false);
        assert_eq!(apply_context_tags(&t), t);
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            task("Email Year 8 parents"),
            task("Chase Dave for the risk assessment"),
            task("Think"),
            {
                let mut t = task("Curriculum review");
                t.estimated_minutes = Some(45);
                t.priority = Priority::High;
                t
            },
        ];
        for sample in samples {
            let once = apply_context_tags(&sample);
            assert_eq!(apply_context_tags(&once), once);
        }
    }
}
