use std::sync::Arc;

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

use crate::{
    callback::CallbackAction,
    registry::{Difficulty, Specialization, TierPolicy},
    render::QuestionView,
};

pub(crate) const PROFILE_BUTTON: &str = "My profile👤";
pub(crate) const STATS_BUTTON: &str = "My results📊";

fn button(text: impl Into<String>, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text, action.to_string())
}

pub(crate) fn specializations_keyboard(specializations: &[Arc<dyn Specialization>]) -> KeyboardMarkup {
    let mut keyboard: Vec<Vec<KeyboardButton>> = specializations
        .iter()
        .map(|s| vec![KeyboardButton::new(s.title())])
        .collect();

    keyboard.push(vec![
        KeyboardButton::new(PROFILE_BUTTON),
        KeyboardButton::new(STATS_BUTTON),
    ]);

    KeyboardMarkup::new(keyboard)
}

/// One button per tier, labelled with the question count the test will
/// actually have given `available` questions in the bank.
pub(crate) fn difficulty_keyboard(
    specialization: &str,
    tiers: &[(Difficulty, TierPolicy)],
    available: usize,
) -> InlineKeyboardMarkup {
    let keyboard: Vec<Vec<InlineKeyboardButton>> = tiers
        .iter()
        .map(|(difficulty, policy)| {
            let label = format!(
                "{} ({} questions, {} min)",
                difficulty.label(),
                policy.question_count.min(available),
                policy.time_limit.as_secs() / 60
            );
            vec![button(
                label,
                CallbackAction::Difficulty {
                    specialization: specialization.to_owned(),
                    difficulty: *difficulty,
                },
            )]
        })
        .collect();

    InlineKeyboardMarkup::new(keyboard)
}

/// Options of one question, selected ones marked, plus the navigation row.
/// Every button carries the session tag and question index it was drawn for.
pub(crate) fn answers_keyboard(specialization: &str, view: &QuestionView) -> InlineKeyboardMarkup {
    let mut keyboard: Vec<Vec<InlineKeyboardButton>> = view
        .question
        .options()
        .iter()
        .enumerate()
        .map(|(option, text)| {
            let mark = if view.selections.contains(&option) { "✅ " } else { "" };
            vec![button(
                format!("{mark}{text}"),
                CallbackAction::Toggle {
                    specialization: specialization.to_owned(),
                    session: view.session_tag.clone(),
                    question: view.index,
                    option,
                },
            )]
        })
        .collect();

    let finish = button(
        "Finish test🏁",
        CallbackAction::Finish {
            specialization: specialization.to_owned(),
            session: view.session_tag.clone(),
        },
    );
    let navigation = if view.is_last {
        vec![finish]
    } else {
        vec![
            button(
                "Next question➡️",
                CallbackAction::Next {
                    specialization: specialization.to_owned(),
                    session: view.session_tag.clone(),
                    question: view.index,
                },
            ),
            finish,
        ]
    };
    keyboard.push(navigation);

    InlineKeyboardMarkup::new(keyboard)
}

pub(crate) fn result_keyboard(specialization: &str) -> InlineKeyboardMarkup {
    let specialization = specialization.to_owned();
    let keyboard = vec![
        vec![button(
            "Get certificate📜",
            CallbackAction::Certificate {
                specialization: specialization.clone(),
            },
        )],
        vec![
            button("Retake🔄", CallbackAction::Retake { specialization }),
            button("Main menu🏠", CallbackAction::Menu),
        ],
    ];

    InlineKeyboardMarkup::new(keyboard)
}
