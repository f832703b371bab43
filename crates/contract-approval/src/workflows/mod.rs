pub mod contract_approval;
