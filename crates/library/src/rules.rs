use std::collections::BTreeSet;
use std::fmt;

use common::{Attribute, Attributes, Category, IdentityKey, RecordingEntity};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttributeConflict {
    pub attempted: Attribute,
    pub conflicting: Attribute,
}

impl fmt::Display for AttributeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot set {} while {} is set",
            self.attempted, self.conflicting
        )
    }
}

/// Checks the invariants every stored attribute set must satisfy.
pub fn validate(attributes: &Attributes) -> Result<(), AttributeConflict> {
    if attributes.drop && attributes.mastered {
        return Err(AttributeConflict {
            attempted: Attribute::Drop,
            conflicting: Attribute::Mastered,
        });
    }
    Ok(())
}

/// Computes the attribute set after switching `attribute`. Setting Drop while
/// Mastered holds, or the reverse, is rejected rather than overwritten.
pub fn transition(
    current: Attributes,
    attribute: Attribute,
    on: bool,
) -> Result<Attributes, AttributeConflict> {
    if on {
        let opposing = match attribute {
            Attribute::Drop => Some(Attribute::Mastered),
            Attribute::Mastered => Some(Attribute::Drop),
            Attribute::Good => None,
        };
        if let Some(opposing) = opposing {
            if current.get(opposing) {
                return Err(AttributeConflict {
                    attempted: attribute,
                    conflicting: opposing,
                });
            }
        }
    }
    let next = current.with(attribute, on);
    validate(&next)?;
    Ok(next)
}

pub fn entities_marked_for_drop<'a, I>(rows: I, category: Option<Category>) -> BTreeSet<IdentityKey>
where
    I: IntoIterator<Item = &'a RecordingEntity>,
{
    rows.into_iter()
        .filter(|row| category.map(|c| row.category() == c).unwrap_or(true))
        .filter(|row| row.attributes.drop && !row.attributes.mastered)
        .map(|row| row.key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Metadata;

    fn row(key: IdentityKey, attributes: Attributes) -> RecordingEntity {
        RecordingEntity {
            key,
            files: BTreeSet::new(),
            complete: true,
            metadata: Metadata::default(),
            search_key: String::new(),
            attributes,
            comment: String::new(),
            first_seen: 0,
            last_seen: 0,
        }
    }

    #[test]
    fn mastered_after_drop_is_rejected() {
        let dropped = Attributes::default().with(Attribute::Drop, true);
        let err = transition(dropped, Attribute::Mastered, true).unwrap_err();
        assert_eq!(err.attempted, Attribute::Mastered);
        assert_eq!(err.conflicting, Attribute::Drop);
    }

    #[test]
    fn drop_after_mastered_is_rejected() {
        let mastered = Attributes::default().with(Attribute::Mastered, true);
        let err = transition(mastered, Attribute::Drop, true).unwrap_err();
        assert_eq!(err.conflicting, Attribute::Mastered);
    }

    #[test]
    fn clearing_and_good_are_always_allowed() {
        let dropped = Attributes::default().with(Attribute::Drop, true);
        let cleared = transition(dropped, Attribute::Drop, false).unwrap();
        assert!(cleared.is_empty());
        let mastered = transition(cleared, Attribute::Mastered, true).unwrap();
        let good = transition(mastered, Attribute::Good, true).unwrap();
        assert!(good.good && good.mastered);
        assert!(transition(good, Attribute::Drop, false).is_ok());
    }

    #[test]
    fn validate_flags_both_set() {
        let both = Attributes {
            good: false,
            drop: true,
            mastered: true,
        };
        assert!(validate(&both).is_err());
        assert!(validate(&Attributes::default()).is_ok());
    }

    #[test]
    fn marked_for_drop_filters_by_category() {
        let dropped = Attributes::default().with(Attribute::Drop, true);
        let rows = vec![
            row(IdentityKey::broadcast("20230219 0230", "ARD", "A"), dropped),
            row(IdentityKey::broadcast("20230219 0330", "ARD", "B"), Attributes::default()),
            row(IdentityKey::download("C", 2020, "tmdbid=1", ""), dropped),
        ];
        let all = entities_marked_for_drop(&rows, None);
        assert_eq!(all.len(), 2);
        let broadcasts = entities_marked_for_drop(&rows, Some(Category::Broadcast));
        assert_eq!(
            broadcasts.into_iter().collect::<Vec<_>>(),
            vec![IdentityKey::broadcast("20230219 0230", "ARD", "A")]
        );
    }
}
