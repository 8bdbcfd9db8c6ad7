//! Deserializers for numeric settings that may arrive as strings once
//! placeholders have been substituted (`limit: ${ROWS}` becomes `"25"`).

use std::fmt::Display;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText<T> {
    Number(T),
    Text(String),
}

fn parse<T, E>(text: &str) -> Result<T, E>
where
    T: FromStr,
    T::Err: Display,
    E: serde::de::Error,
{
    text.trim()
        .parse()
        .map_err(|e| E::custom(format!("invalid number '{text}': {e}")))
}

pub(crate) fn number<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match NumberOrText::<T>::deserialize(de)? {
        NumberOrText::Number(v) => Ok(v),
        NumberOrText::Text(s) => parse(&s),
    }
}

pub(crate) fn opt_number<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match Option::<NumberOrText<T>>::deserialize(de)? {
        None => Ok(None),
        Some(NumberOrText::Number(v)) => Ok(Some(v)),
        Some(NumberOrText::Text(s)) if s.trim().is_empty() => Err(D::Error::custom("empty number")),
        Some(NumberOrText::Text(s)) => parse(&s).map(Some),
    }
}
