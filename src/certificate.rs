use std::fmt::Write;

use crate::render::{format_duration, ResultSummary};

/// Plain-text certificate for one finished attempt.
pub fn certificate_text(summary: &ResultSummary) -> String {
    let profile = &summary.profile;
    let mut text = String::new();

    let _ = writeln!(text, "CERTIFICATE");
    let _ = writeln!(text, "of completing the {} test", summary.specialization_title);
    let _ = writeln!(text);
    let _ = writeln!(text, "Issued to: {}", profile.full_name);
    let _ = writeln!(text, "Position: {}", profile.position);
    let _ = writeln!(text, "Department: {}", profile.department);
    let _ = writeln!(text, "Difficulty: {}", summary.difficulty.label());
    let _ = writeln!(text, "Grade: {}", summary.grade);
    let _ = writeln!(
        text,
        "Correct answers: {} of {}",
        summary.score.correct, summary.score.total
    );
    let _ = writeln!(text, "Percentage: {:.0}%", summary.score.percentage);
    let _ = writeln!(text, "Time taken: {}", format_duration(summary.time_taken));
    let _ = writeln!(text, "Date: {}", summary.completed_at.format("%d.%m.%Y %H:%M UTC"));

    text
}

/// File name for the certificate document, unique per user and attempt time.
pub fn certificate_file_name(summary: &ResultSummary) -> String {
    format!(
        "certificate_{}_{}_{}.txt",
        summary.key.specialization,
        summary.key.user_id,
        summary.completed_at.timestamp()
    )
}
