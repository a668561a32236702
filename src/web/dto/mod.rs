pub mod relay_dto;
