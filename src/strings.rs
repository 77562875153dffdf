pub const VERIFICATION_SUCCESSFUL: &str = "Verification successful";

pub fn missing_field(name: &str) -> String {
    format!("No {} was provided. Upload the email and name the address to match.", name)
}

pub fn failure_message(stage: &str, reason: &str, resumable: bool) -> String {
    if resumable {
        format!(
            "The {} stage did not finish in time ({}). Nothing was lost: \
            send the same request again to resume where it stopped.",
            stage, reason
        )
    } else {
        format!("The {} stage failed: {}.", stage, reason)
    }
}
