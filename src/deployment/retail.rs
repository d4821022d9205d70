//! Built-in retail deployment
//!
//! orders.user -> customers._id
//! orders.items.product -> products._id
//! products.category -> categories._id

use super::{AliasTable, Deployment, DisplayName, RelationshipFact};

pub(super) fn deployment() -> Deployment {
    Deployment::empty()
        .with_aliases("orders", orders_aliases())
        .with_aliases("products", products_aliases())
        .with_aliases("customers", customers_aliases())
        .with_aliases("categories", categories_aliases())
        .with_relationship(
            RelationshipFact::new("orders", "user", "customers", "customer_info")
                .with_wrong_targets(&["users", "user", "customer"])
                .with_wrong_local_fields(&[
                    "userId",
                    "user_id",
                    "customer",
                    "customerId",
                    "customer_id",
                ])
                .with_display(
                    DisplayName::FullName {
                        first: "first_name".into(),
                        last: "last_name".into(),
                    },
                    "customer_name",
                )
                .with_composite_names(&[
                    "name",
                    "full_name",
                    "fullName",
                    "fullname",
                    "username",
                    "customer_name",
                    "customerName",
                ]),
        )
        .with_relationship(
            RelationshipFact::new("orders", "items.product", "products", "product_info")
                .with_wrong_targets(&["product", "items", "order_items"])
                .with_wrong_local_fields(&[
                    "items.product_id",
                    "items.productId",
                    "product",
                    "product_id",
                    "productId",
                ])
                .with_display(
                    DisplayName::Field {
                        field: "name".into(),
                    },
                    "product_name",
                ),
        )
        .with_relationship(
            RelationshipFact::new("products", "category", "categories", "category_info")
                .with_wrong_targets(&["category", "product_categories"])
                .with_wrong_local_fields(&["category_id", "categoryId"])
                .with_display(
                    DisplayName::Field {
                        field: "name".into(),
                    },
                    "category_name",
                ),
        )
}

fn orders_aliases() -> AliasTable {
    AliasTable::new()
        .with_fields(
            "total_amount",
            &["total", "amount", "totalAmount", "order_total", "order_amount", "total_price"],
        )
        .with_fields("user", &["userId", "user_id", "customerId", "customer_id"])
        .with_fields(
            "order_date",
            &["createdAt", "created_at", "date", "orderDate", "created_date", "purchase_date"],
        )
        .with_fields("status", &["orderStatus", "order_status"])
        .with_fields("items", &["line_items", "lineItems", "order_items"])
        .with_leaves("product", &["product_id", "productId"])
        .with_leaves("quantity", &["qty"])
}

fn products_aliases() -> AliasTable {
    AliasTable::new()
        .with_fields("name", &["product_name", "productName", "title"])
        .with_fields("price", &["cost", "unit_price", "unitPrice"])
        .with_fields("category", &["categoryId", "category_id"])
        .with_fields("stock", &["inventory", "qty", "quantity_in_stock", "stock_level"])
}

fn customers_aliases() -> AliasTable {
    AliasTable::new()
        .with_fields("first_name", &["firstName", "firstname", "given_name"])
        .with_fields("last_name", &["lastName", "lastname", "surname", "family_name"])
        .with_fields("email", &["email_address", "emailAddress", "mail"])
}

fn categories_aliases() -> AliasTable {
    AliasTable::new().with_fields("name", &["category_name", "categoryName", "title"])
}
