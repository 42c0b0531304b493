/// Hand-off to the device's messaging surface. Delivery is never confirmed.
pub trait MessageDispatcher: Send + Sync {
    fn dispatch(&self, handle: &str, text: &str);

    /// Whether dispatching switches the user to another app, so the next
    /// recipient waits for the app to come back to the foreground.
    fn leaves_app(&self) -> bool {
        true
    }
}

/// `sms:` link understood by both major mobile platforms.
pub fn sms_link(handle: &str, text: &str) -> String {
    let handle: String = handle
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    format!("sms:{}?&body={}", handle, urlencoding::encode(text))
}

type Launcher = Box<dyn Fn(&str) + Send + Sync>;

/// Builds an `sms:` link per message and passes it to a launcher.
pub struct SmsLinkDispatcher {
    launcher: Launcher,
}

impl SmsLinkDispatcher {
    pub fn new<F>(launcher: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            launcher: Box::new(launcher),
        }
    }
}

impl std::fmt::Debug for SmsLinkDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmsLinkDispatcher").finish_non_exhaustive()
    }
}

impl MessageDispatcher for SmsLinkDispatcher {
    fn dispatch(&self, handle: &str, text: &str) {
        let link = sms_link(handle, text);
        tracing::info!(handle, "Handing message to messaging app");
        (self.launcher)(&link);
    }
}
