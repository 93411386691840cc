pub mod account;
pub mod assignment;
pub mod courier;
pub mod customer;
pub mod event;
pub mod order;
pub mod restaurant;
pub mod review;
