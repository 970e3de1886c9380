pub mod review_service;
