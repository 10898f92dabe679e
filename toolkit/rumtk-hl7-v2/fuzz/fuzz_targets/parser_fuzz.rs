#![no_main]

use libfuzzer_sys::fuzz_target;
use rumtk_hl7_v2::parse_message;

fuzz_target!(|data: &str| {
    let segments: Vec<String> = data.split('\r').map(String::from).collect();
    if let Ok(message) = parse_message(segments) {
        let _ = message.message_type();
        let _ = message.patient_identifier();
        let _ = message.observation();
    }
});
