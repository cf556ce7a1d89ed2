/*!
Data model of the catalog: schemas, tag rows, tables, the vetted table
config and the wire messages it is built from.
*/

pub mod config;
pub mod kvrow;
pub mod msg;
pub mod schema;
pub mod table;
