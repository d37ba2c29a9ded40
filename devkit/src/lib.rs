/*!
# macOS System agent DevKit - stubs and helpers for tests

- Scripted command runner answering shell and AppleScript calls without a Mac
- MQTT client mock for bridge tests without a broker
- Harness wiring a store, a context and the scripted runner together
*/

pub mod mqtt_stub;
pub mod scripted_runner;
pub mod test_utils;

pub use mqtt_stub::MockMqttClient;
pub use scripted_runner::ScriptedRunner;
pub use test_utils::TestHarness;
