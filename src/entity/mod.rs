pub mod audit_logs;
pub mod cart_items;
pub mod carts;
pub mod order_status_history;
pub mod orders;
pub mod payments;
pub mod products;
pub mod users;

pub use audit_logs::Entity as AuditLogs;
pub use cart_items::Entity as CartItems;
pub use carts::Entity as Carts;
pub use order_status_history::Entity as OrderStatusHistory;
pub use orders::Entity as Orders;
pub use payments::Entity as Payments;
pub use products::Entity as Products;
pub use users::Entity as Users;
