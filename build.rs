fn main() {
    // Only the device build links against ESP-IDF; host builds run the
    // simulator and the unit tests.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
