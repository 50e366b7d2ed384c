//! Closed-vocabulary text columns (status, priority, client type, ...).
//!
//! Values are stored as their display text. Parsing is case-insensitive and
//! accepts a small alias table so that "high" lands on `P1`.

/// Generates a text-backed enum with `as_str`, `Display`, `FromStr`,
/// serde support, and a Postgres TEXT mapping.
macro_rules! choice_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const VALUES: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            /// Canonical spelling for a user-supplied value, if it names a variant.
            pub fn canonical(input: &str) -> Option<&'static str> {
                input.parse::<$name>().ok().map(|v| v.as_str())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let needle = s.trim().to_lowercase();
                $(
                    if needle == $text.to_lowercase() $(|| needle == $alias)* {
                        return Ok($name::$variant);
                    }
                )+
                let mut msg = format!("'{}' is not one of: {}", s, $name::VALUES.join(", "));
                if let Some(near) = $crate::similarity::closest(s.trim(), $name::VALUES) {
                    msg.push_str(&format!("; did you mean '{}'?", near));
                }
                Err(msg)
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let text = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                text.parse::<$name>().map_err(Into::into)
            }
        }
    };
}

choice_enum! {
    /// Kind of relationship with a client.
    ClientType {
        Family => "Family",
        Privat => "Privat" | "private",
        Internal => "Internal",
        External => "External",
    }
}

choice_enum! {
    ClientStatus {
        Active => "Active",
        Archive => "Archive" | "archived",
    }
}

choice_enum! {
    ProjectPriority {
        P1 => "P1" | "high" | "urgent",
        P2 => "P2" | "medium" | "normal",
        P3 => "P3" | "low",
    }
}

choice_enum! {
    ProjectStatus {
        NotStarted => "Not started" | "todo",
        InProgress => "In progress" | "in-progress" | "active",
        Stuck => "Stuck" | "blocked",
        Done => "Done" | "completed" | "complete",
    }
}

choice_enum! {
    TaskStatus {
        Inbox => "Inbox",
        Later => "Paused/Later (P3)" | "paused" | "later",
        Next => "Next (P2)" | "next",
        Now => "Now (P1)" | "now",
        InProgress => "In progress" | "in-progress",
        DraftReview => "Draft Review" | "review",
        WaitingForFeedback => "Waiting for Feedback" | "waiting",
        Done => "Done" | "completed" | "complete",
    }
}

choice_enum! {
    Weekday {
        Monday => "Monday",
        Tuesday => "Tuesday",
        Wednesday => "Wednesday",
        Thursday => "Thursday",
        Friday => "Friday",
        Saturday => "Saturday",
        Sunday => "Sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("not STARTED".parse::<ProjectStatus>(), Ok(ProjectStatus::NotStarted));
        assert_eq!("archive".parse::<ClientStatus>(), Ok(ClientStatus::Archive));
    }

    #[test]
    fn priority_aliases_map_to_canonical_levels() {
        assert_eq!(ProjectPriority::canonical("high"), Some("P1"));
        assert_eq!(ProjectPriority::canonical("Medium"), Some("P2"));
        assert_eq!(ProjectPriority::canonical("low"), Some("P3"));
        assert_eq!(ProjectPriority::canonical("whenever"), None);
    }

    #[test]
    fn task_status_keeps_punctuated_spelling() {
        let status: TaskStatus = "paused/later (p3)".parse().unwrap();
        assert_eq!(status.as_str(), "Paused/Later (P3)");
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"Paused/Later (P3)\"");
    }

    #[test]
    fn invalid_value_lists_the_options() {
        let err = "someday".parse::<Weekday>().unwrap_err();
        assert!(err.contains("Monday"), "got: {}", err);
        assert!(err.contains("someday"));
        assert!(!err.contains("did you mean"), "got: {}", err);
    }

    #[test]
    fn near_miss_suggests_the_closest_value() {
        let err = "Wensday".parse::<Weekday>().unwrap_err();
        assert!(err.ends_with("did you mean 'Wednesday'?"), "got: {}", err);

        let err = "in progres".parse::<ProjectStatus>().unwrap_err();
        assert!(err.ends_with("did you mean 'In progress'?"), "got: {}", err);
    }
}
