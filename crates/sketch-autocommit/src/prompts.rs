//! Instruction payloads for the code-generation oracle.
//!
//! Contract versioning: bump `CONTRACT_VERSION` whenever `HARDWARE_CONTRACT`
//! changes. The version is logged with every run so a published sketch can be
//! traced back to the contract that produced it.

use crate::stamper::MARKER_KEY;

/// Hardware contract version. Bump on any change to `HARDWARE_CONTRACT`.
pub const CONTRACT_VERSION: &str = "1.0.0";

/// URL the firmware polls for its over-the-air update image.
pub const OTA_ARTIFACT_URL: &str =
    "https://raw.githubusercontent.com/levy1107/kitmaker-firmware/main/firmware/latest.bin";

/// Fixed facts about the ESP32 KitMaker 2.0 board that every generated
/// sketch must respect.
pub const HARDWARE_CONTRACT: &str = "\
You are an assistant that answers only with valid code for the ESP32 KitMaker 2.0 board. \
Do not add extra text or explanations; return only the contents of the .ino file.

## Board pins and components
- Microcontroller: ESP32
- GPIO39: TEMT6000 light sensor (ADC)
- I2C (SDA=GPIO21, SCL=GPIO22): HTU21D temperature/humidity sensor and 128x64 OLED
- GPIO14: BL2500 tilt/vibration sensor
- GPIO0: left push button
- GPIO15: middle push button (hold 5 s to trigger the OTA pull)
- GPIO13: right push button
- GPIO36: battery measurement switch (ADC)
- GPIO27: 4 programmable NeoPixels
- GPIO12: passive buzzer
- MicroUSB CP2102 port for charging and programming
- Charge and RxTx indicator LEDs, JST battery connector, RJ9

## Mandatory in every sketch
- Wi-Fi initialisation joining SSID \"Polotics\" with password \"P4L4T3cs\".
- Pull-OTA logic that downloads and flashes the image from:
  https://raw.githubusercontent.com/levy1107/kitmaker-firmware/main/firmware/latest.bin
- A version marker line of the exact form `#define FW_VERSION \"YYYYMMDDHHMM\"`. \
Keep the existing line if there is one; the value is rewritten after generation.
";

/// The two instruction turns sent to the oracle for one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequestPayload {
    pub system: String,
    pub user: String,
}

/// Build the instruction payload for applying `request` to `current`.
///
/// `current` may be empty when the sketch does not exist yet; the payload has
/// the same shape either way.
pub fn format_change_request(current: &str, request: &str) -> ChangeRequestPayload {
    let fence = fence_for(current);

    let mut user = String::with_capacity(current.len() + request.len() + 256);
    user.push_str("Here is the current code:\n");
    user.push_str(&fence);
    user.push_str("cpp\n");
    user.push_str(current);
    if !current.is_empty() && !current.ends_with('\n') {
        user.push('\n');
    }
    user.push_str(&fence);
    user.push_str("\n\nPlease apply this change:\n");
    user.push_str(request);
    user.push_str("\n\nReply with the complete .ino file inside exactly one fenced code block, ");
    user.push_str("with no prose before or after it. Keep the ");
    user.push_str(MARKER_KEY);
    user.push_str(" line.");

    ChangeRequestPayload {
        system: HARDWARE_CONTRACT.to_string(),
        user,
    }
}

/// A backtick fence longer than any backtick run inside `body`, so the body
/// can never close it early.
fn fence_for(body: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in body.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}
