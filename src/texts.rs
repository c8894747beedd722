use serde::Deserialize;

/// Language code attached to each reception channel in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Language {
    #[serde(rename = "RU")]
    Ru,
    #[serde(rename = "ENG")]
    Eng,
}

const RU_CLOSE_RECEPTION: &str = "Уважаемые клиенты! По техническим причинам приём заявок временно приостановлен. Мы уже работаем над устранением проблемы. Приносим извинения за неудобства.";

const ENG_CLOSE_RECEPTION: &str = "Dear customers! Due to technical problems, reception of new requests is temporarily suspended. We are already working on a fix. We apologize for the inconvenience.";

impl Language {
    /// Localized outage notice for the "close reception" broadcast.
    pub fn close_reception_text(self) -> &'static str {
        match self {
            Language::Ru => RU_CLOSE_RECEPTION,
            Language::Eng => ENG_CLOSE_RECEPTION,
        }
    }
}
