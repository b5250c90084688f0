/// Chat-side dialogue state. Quiz progress is not kept here; it lives in the
/// session store so it survives restarts.
#[derive(Debug, Clone, Default)]
pub enum QuizState {
    #[default]
    Start,

    // PART FOR --- REGISTRATION ---
    /// `specialization` is the test to offer once the profile is saved.
    ReceiveFullName {
        specialization: Option<String>,
    },
    ReceivePosition {
        specialization: Option<String>,
        full_name: String,
    },
    ReceiveDepartment {
        specialization: Option<String>,
        full_name: String,
        position: String,
    },
}
