use chrono::Utc;

use super::composite::{CompositeOrder, Proposal, SubOrder};
use super::state_machine;
use super::value_objects::{
    ItemId, OrderId, OrderItem, ProductId, ProposalId, ProposalStatus, ProposalType, SubOrderId,
    SubOrderStatus, VendorId,
};

// ============================================================================
// Test Fixtures - shared builders for order snapshots
// ============================================================================

pub(crate) fn order_item(id: &str, quantity: u32, unit_price: f64) -> OrderItem {
    let mut item = OrderItem {
        id: ItemId::from(id),
        product_id: ProductId::new(format!("prod-{id}")),
        product_name: format!("Product {id}"),
        quantity,
        unit_price,
        total_price: 0.0,
    };
    item.recompute_total();
    item
}

/// One-item sub-order; `sub-N` owns `item-N`.
pub(crate) fn sub_order(id: &str, vendor_id: &str, status: SubOrderStatus) -> SubOrder {
    let suffix = id.rsplit('-').next().unwrap();
    let mut sub = SubOrder {
        id: SubOrderId::from(id),
        vendor_id: VendorId::from(vendor_id),
        vendor_name: format!("Vendor {vendor_id}"),
        status,
        items: vec![order_item(&format!("item-{suffix}"), 2, 3.0)],
        proposals: Vec::new(),
        subtotal: 0.0,
    };
    sub.recompute_subtotal();
    sub
}

/// Fresh two-vendor order: `sub-1`/`sub-2`, both `PENDING`, no proposals.
pub(crate) fn two_vendor_order(id: &str) -> CompositeOrder {
    let sub_orders = vec![
        sub_order("sub-1", "vendor-1", SubOrderStatus::Pending),
        sub_order("sub-2", "vendor-2", SubOrderStatus::Pending),
    ];
    let mut order = CompositeOrder {
        id: OrderId::from(id),
        status: state_machine::derive_status(&sub_orders),
        sub_orders,
        total_amount: 0.0,
        delivery_address: "1 Harbor Way".to_string(),
        created_at: Utc::now(),
    };
    order.recompute_total();
    order
}

pub(crate) fn quantity_proposal(
    id: &str,
    sub_order_id: &str,
    item_id: &str,
    proposed_quantity: u32,
) -> Proposal {
    Proposal {
        id: ProposalId::from(id),
        sub_order_id: SubOrderId::from(sub_order_id),
        item_id: ItemId::from(item_id),
        kind: ProposalType::QuantityReduced,
        proposed_quantity: Some(proposed_quantity),
        status: ProposalStatus::Pending,
    }
}

pub(crate) fn unavailable_proposal(id: &str, sub_order_id: &str, item_id: &str) -> Proposal {
    Proposal {
        id: ProposalId::from(id),
        sub_order_id: SubOrderId::from(sub_order_id),
        item_id: ItemId::from(item_id),
        kind: ProposalType::Unavailable,
        proposed_quantity: None,
        status: ProposalStatus::Pending,
    }
}
