use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::event::normalize_category;

/// A curated display-only event. RSVPs on these never reach the event store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowcaseEvent {
    pub id: String,
    pub title: String,
    pub city: String,
    pub neighborhood: String,
    /// Spanish short label, e.g. `"Vie, 15 Dic · 8:00 PM"`.
    pub date_label: String,
    pub kind: String,
    pub members_count: u32,
    pub remaining_spots: u32,
    pub members_only: bool,
    pub image_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowcaseEntry {
    pub event: ShowcaseEvent,
    pub going: bool,
}

impl ShowcaseEvent {
    pub fn category(&self) -> String {
        normalize_category(&self.kind)
    }

    pub fn total_spots(&self) -> u32 {
        self.members_count + self.remaining_spots
    }

    /// Splits the label into its day part and its time part.
    pub fn label_parts(&self) -> (&str, &str) {
        let mut parts = self.date_label.splitn(2, '·');
        let day = parts.next().map(str::trim).unwrap_or_default();
        let time = parts.next().map(str::trim).unwrap_or_default();

        (day, time)
    }

    /// The label carries no year, so the caller supplies it.
    pub fn starts_at(&self, year: i32) -> Option<DateTime<Utc>> {
        let (day, time) = self.label_parts();
        let date = parse_day(day, year)?;
        let time = parse_time(time)?;

        Utc.from_local_datetime(&date.and_time(time)).single()
    }
}

impl ShowcaseEntry {
    pub fn spots_remaining(&self) -> u32 {
        match self.going {
            true => self.event.remaining_spots.saturating_sub(1),
            false => self.event.remaining_spots,
        }
    }
}

const MONTHS: [&str; 12] = [
    "ene", "feb", "mar", "abr", "may", "jun", "jul", "ago", "sep", "oct", "nov", "dic",
];

fn parse_day(raw: &str, year: i32) -> Option<NaiveDate> {
    // "Vie, 15 Dic": the weekday is decorative
    let raw = raw.rsplit(',').next()?.trim();
    let mut parts = raw.split_whitespace();

    let day: u32 = parts.next()?.parse().ok()?;
    let month = parts.next()?.to_lowercase();
    let month = MONTHS.iter().position(|m| month.starts_with(m))? as u32 + 1;

    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let mut parts = raw.split_whitespace();
    let clock = parts.next()?;
    let meridiem = parts.next().map(str::to_uppercase);

    let (hour, minute) = clock.split_once(':')?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;

    let hour = match meridiem.as_deref() {
        Some("AM") if hour == 12 => 0,
        Some("AM") => hour,
        Some("PM") if hour == 12 => 12,
        Some("PM") => hour + 12,
        None => hour,
        Some(_) => return None,
    };

    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn showcase(
    id: &str,
    title: &str,
    neighborhood: &str,
    date_label: &str,
    kind: &str,
    members_count: u32,
    remaining_spots: u32,
    members_only: bool,
    image_url: &str,
) -> ShowcaseEvent {
    ShowcaseEvent {
        id: id.into(),
        title: title.into(),
        city: "Miami".into(),
        neighborhood: neighborhood.into(),
        date_label: date_label.into(),
        kind: kind.into(),
        members_count,
        remaining_spots,
        members_only,
        image_url: image_url.into(),
    }
}

pub fn catalog() -> Vec<ShowcaseEvent> {
    vec![
        showcase(
            "showcase-1",
            "Noche de Cocteles en Brickell",
            "Brickell",
            "Vie, 15 Dic · 8:00 PM",
            "Cóctel íntimo",
            45,
            5,
            true,
            "https://images.unsplash.com/photo-1519677100203-a0e668c92439?w=800&q=80",
        ),
        showcase(
            "showcase-2",
            "Cena Privada en Rooftop de Wynwood",
            "Wynwood",
            "Sáb, 16 Dic · 7:30 PM",
            "Cena privada",
            32,
            8,
            true,
            "https://images.unsplash.com/photo-1511795409834-ef04bbd61622?w=800&q=80",
        ),
        showcase(
            "showcase-3",
            "Arte & Vino en South Beach",
            "South Beach",
            "Dom, 17 Dic · 6:00 PM",
            "Arte & Vino",
            28,
            12,
            false,
            "https://images.unsplash.com/photo-1534447677768-be436bb09401?w=800&q=80",
        ),
        showcase(
            "showcase-4",
            "Networking Nocturno en Design District",
            "Design District",
            "Lun, 18 Dic · 7:00 PM",
            "Networking",
            52,
            3,
            true,
            "https://images.unsplash.com/photo-1511578314322-379afb476865?w=800&q=80",
        ),
        showcase(
            "showcase-5",
            "Brunch Exclusivo en Key Biscayne",
            "Key Biscayne",
            "Sáb, 23 Dic · 11:00 AM",
            "Brunch",
            25,
            10,
            false,
            "https://images.unsplash.com/photo-1521017432531-fbd92d768814?w=800&q=80",
        ),
        showcase(
            "showcase-6",
            "Noche de Jazz en Little Havana",
            "Little Havana",
            "Vie, 22 Dic · 9:00 PM",
            "Música en vivo",
            40,
            15,
            false,
            "https://images.unsplash.com/photo-1493225457124-a3eb161ffa5f?w=800&q=80",
        ),
    ]
}

#[test]
fn parses_spanish_labels() {
    let events = catalog();

    let brickell = &events[0];
    assert_eq!(brickell.label_parts(), ("Vie, 15 Dic", "8:00 PM"));
    assert_eq!(
        brickell.starts_at(2025).unwrap(),
        Utc.with_ymd_and_hms(2025, 12, 15, 20, 0, 0).unwrap()
    );

    let brunch = &events[4];
    assert_eq!(
        brunch.starts_at(2025).unwrap(),
        Utc.with_ymd_and_hms(2025, 12, 23, 11, 0, 0).unwrap()
    );
}

#[test]
fn unparseable_labels_yield_none() {
    let mut event = catalog().remove(0);

    event.date_label = "Someday".into();
    assert!(event.starts_at(2025).is_none());

    event.date_label = "Vie, 31 Feb · 8:00 PM".into();
    assert!(event.starts_at(2025).is_none());
}

#[test]
fn categories_and_spots() {
    let events = catalog();

    assert_eq!(events[2].category(), "ARTE_VINO");
    assert_eq!(events[0].total_spots(), 50);

    let entry = ShowcaseEntry {
        event: events[3].clone(),
        going: true,
    };
    assert_eq!(entry.spots_remaining(), 2);
}
