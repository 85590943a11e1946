use hashbrown::HashMap;

use crate::op::{Operation, OperationIdentity, OperationKind};

/// Collapses operations that share a name and target into one, then orders
/// the result so that connection types and cards are created before anything
/// that may reference them.
///
/// Merging is field-level last-write-wins for updates and summing for
/// counters. Each merged operation keeps the position of the first operation
/// with its identity. The function is idempotent.
pub fn squash(ops: Vec<Operation>) -> Vec<Operation> {
    let mut index: HashMap<OperationIdentity, usize> = HashMap::with_capacity(ops.len());
    let mut merged: Vec<Operation> = Vec::with_capacity(ops.len());

    for op in ops {
        let identity = op.identity();
        match index.get(&identity) {
            Some(&at) => merged[at].merge_from(op),
            None => {
                index.insert(identity, merged.len());
                merged.push(op);
            }
        }
    }

    // Stable: relative order within each group is kept.
    merged.sort_by_key(|op| dependency_rank(op.kind()));
    merged
}

fn dependency_rank(kind: OperationKind) -> u8 {
    match kind {
        OperationKind::CreateConnectionType => 0,
        OperationKind::CreateCard => 1,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entity::{Card, CardPatch, ConnectionType, Update},
        op::{CountDelta, OperationBody, Session},
        types::ManualClock,
    };

    fn op(body: OperationBody) -> Operation {
        Operation::new(body, &Session::signed_in("u", "s", "k"), &ManualClock::new(5))
    }

    fn update_card(id: &str, patch: CardPatch) -> Operation {
        op(OperationBody::UpdateCard(Update::with(id, patch)))
    }

    #[test]
    fn same_target_updates_merge_field_by_field() {
        let out = squash(vec![
            update_card(
                "c1",
                CardPatch {
                    name: Some("a".into()),
                    x: Some(1.0),
                    ..CardPatch::default()
                },
            ),
            update_card("c2", CardPatch::default()),
            update_card(
                "c1",
                CardPatch {
                    name: Some("b".into()),
                    ..CardPatch::default()
                },
            ),
        ]);

        assert_eq!(out.len(), 2);
        let OperationBody::UpdateCard(u) = &out[0].body else {
            panic!("expected updateCard, got {:?}", out[0].kind());
        };
        assert_eq!(u.id, "c1");
        assert_eq!(u.patch.name.as_deref(), Some("b"));
        assert_eq!(u.patch.x, Some(1.0));
    }

    #[test]
    fn types_then_cards_are_hoisted() {
        let out = squash(vec![
            update_card("c9", CardPatch::default()),
            op(OperationBody::CreateCard(Card {
                id: "c1".into(),
                ..Card::default()
            })),
            op(OperationBody::CreateConnectionType(ConnectionType {
                id: "t1".into(),
                ..ConnectionType::default()
            })),
        ]);
        let kinds: Vec<_> = out.iter().map(Operation::kind).collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::CreateConnectionType,
                OperationKind::CreateCard,
                OperationKind::UpdateCard
            ]
        );
    }

    #[test]
    fn counters_collapse_to_their_sum() {
        let counter = |delta| op(OperationBody::UpdateUserCardsCreatedCount(CountDelta { delta }));
        let out = squash(vec![counter(1), counter(1), counter(-1)]);
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].body,
            OperationBody::UpdateUserCardsCreatedCount(CountDelta { delta: 1 })
        );
    }
}
