use serde::{Deserialize, Serialize};

/// Quick-reply button. `callback` comes back verbatim as the inbound `callback` field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub callback: String,
}

impl Button {
    pub fn new(label: impl Into<String>, callback: impl Into<String>) -> Self {
        Self { label: label.into(), callback: callback.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), buttons: Vec::new() }
    }

    pub fn has_buttons(&self) -> bool {
        !self.buttons.is_empty()
    }
}

/// Accumulates paragraphs and buttons; paragraphs are joined by a blank line.
#[derive(Default)]
pub struct ReplyBuilder {
    paragraphs: Vec<String>,
    buttons: Vec<Button>,
}

impl ReplyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paragraph(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.trim().is_empty() {
            self.paragraphs.push(text.trim().to_string());
        }
        self
    }

    pub fn push_paragraph(&mut self, text: impl Into<String>) -> &mut Self {
        let text = text.into();
        if !text.trim().is_empty() {
            self.paragraphs.push(text.trim().to_string());
        }
        self
    }

    pub fn button(mut self, label: impl Into<String>, callback: impl Into<String>) -> Self {
        self.buttons.push(Button::new(label, callback));
        self
    }

    pub fn push_button(&mut self, button: Button) -> &mut Self {
        if !self.buttons.iter().any(|existing| existing.callback == button.callback) {
            self.buttons.push(button);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }

    pub fn build(self) -> Reply {
        Reply { text: self.paragraphs.join("\n\n"), buttons: self.buttons }
    }
}
